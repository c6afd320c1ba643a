use std::future::Future;

use crate::api::NovelApi;
use crate::model::{Outline, OutlineRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCheck {
    Clear,
    Blocked { blocking: OutlineRef },
}

/// Checks that every outline before `outline_id` (by `order_index`) already
/// has chapters. Predecessors are queried one at a time in ascending order and
/// the first one without chapters is reported. A failed query is logged and
/// counted as non-blocking.
pub async fn validate_order<F, Fut>(
    outline_id: &str,
    outlines: &[Outline],
    mut has_chapters: F,
) -> OrderCheck
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let Some(target) = outlines.iter().find(|o| o.id == outline_id) else {
        tracing::warn!(outline_id, "outline not in project list; skipping order check");
        return OrderCheck::Clear;
    };

    let mut earlier: Vec<&Outline> = outlines
        .iter()
        .filter(|o| o.order_index < target.order_index)
        .collect();
    earlier.sort_by_key(|o| o.order_index);

    for outline in earlier {
        match has_chapters(outline.id.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    outline_id,
                    blocking_id = %outline.id,
                    blocking_order = outline.order_index,
                    "earlier outline not expanded yet"
                );
                return OrderCheck::Blocked {
                    blocking: outline.outline_ref(),
                };
            }
            Err(err) => {
                tracing::warn!(
                    outline_id = %outline.id,
                    error = %format!("{err:#}"),
                    "chapter check failed; treating as expanded"
                );
            }
        }
    }

    OrderCheck::Clear
}

/// [`validate_order`] backed by the backend's chapter query.
pub async fn validate_order_with(
    api: &dyn NovelApi,
    outline_id: &str,
    outlines: &[Outline],
) -> OrderCheck {
    validate_order(outline_id, outlines, |id| async move {
        Ok::<_, anyhow::Error>(api.outline_chapters(&id).await?.has_chapters)
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn outline(id: &str, order_index: i64) -> Outline {
        Outline {
            id: id.to_owned(),
            project_id: "p1".to_owned(),
            order_index,
            title: format!("Outline {order_index}"),
            content: String::new(),
            structure: None,
        }
    }

    async fn check(
        target: &str,
        outlines: &[Outline],
        answers: &HashMap<&str, Option<bool>>,
    ) -> (OrderCheck, Vec<String>) {
        let mut calls = Vec::new();
        let result = validate_order(target, outlines, |id| {
            calls.push(id.clone());
            let answer = answers.get(id.as_str()).copied().flatten();
            async move { answer.ok_or_else(|| anyhow::anyhow!("network down")) }
        })
        .await;
        (result, calls)
    }

    #[tokio::test]
    async fn reports_first_blocker_in_ascending_order() {
        // Deliberately unsorted input.
        let outlines = vec![outline("o3", 3), outline("o2", 2), outline("o1", 1)];
        let answers = HashMap::from([("o1", Some(false)), ("o2", Some(false))]);

        let (result, calls) = check("o3", &outlines, &answers).await;

        let OrderCheck::Blocked { blocking } = &result else {
            panic!("expected blocked, got {result:?}");
        };
        assert_eq!(blocking.id, "o1");
        assert_eq!(calls, vec!["o1".to_owned()]);
    }

    #[tokio::test]
    async fn failed_check_does_not_abort_remaining_outlines() {
        let outlines = vec![
            outline("o1", 1),
            outline("o2", 2),
            outline("o3", 3),
            outline("o4", 4),
        ];
        let answers = HashMap::from([("o1", Some(true)), ("o2", None), ("o3", Some(false))]);

        let (result, calls) = check("o4", &outlines, &answers).await;

        assert_eq!(
            result,
            OrderCheck::Blocked {
                blocking: outline("o3", 3).outline_ref()
            }
        );
        assert_eq!(calls, vec!["o1", "o2", "o3"]);
    }

    #[tokio::test]
    async fn failed_check_on_only_predecessor_is_clear() {
        let outlines = vec![outline("o1", 1), outline("o2", 2)];
        let answers = HashMap::from([("o1", None)]);

        let (result, _) = check("o2", &outlines, &answers).await;
        assert_eq!(result, OrderCheck::Clear);
    }

    #[tokio::test]
    async fn first_outline_needs_no_queries() {
        let outlines = vec![outline("o1", 1), outline("o2", 2)];
        let (result, calls) = check("o1", &outlines, &HashMap::new()).await;
        assert_eq!(result, OrderCheck::Clear);
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn unknown_outline_is_clear() {
        let outlines = vec![outline("o1", 1)];
        let (result, calls) = check("missing", &outlines, &HashMap::new()).await;
        assert_eq!(result, OrderCheck::Clear);
        assert!(calls.is_empty());
    }
}
