#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Canned backend state. Outline ids double as chapter-id prefixes.
#[derive(Debug, Clone, Default)]
pub struct BackendStubConfig {
    /// `(id, order_index)` pairs for the project `p1`.
    pub outlines: Vec<(String, i64)>,
    /// Outlines that already have two chapters.
    pub expanded: HashSet<String>,
    /// Outlines whose create-chapters call fails with a 500.
    pub failing_commits: HashSet<String>,
    /// Outlines whose expand stream ends with an error frame.
    pub failing_expansions: HashSet<String>,
    /// Outlines whose expand stream stops after the result, with no `done` frame.
    pub truncated_expansions: HashSet<String>,
    /// Raw GitHub commit records served on every commits page.
    pub commits: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

pub struct BackendStub {
    pub base_url: String,
    pub api_base: String,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl BackendStub {
    pub fn spawn(config: BackendStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start backend stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let api_base = format!("{base_url}/api");

        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut state = StubState::new(config);
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let method = request.method().to_string().to_ascii_uppercase();
                let path = request.url().to_string();
                let mut raw = String::new();
                let _ = request.as_reader().read_to_string(&mut raw);
                let body: Option<Value> = serde_json::from_str(&raw).ok();

                recorded.lock().unwrap().push(RecordedCall {
                    method: method.clone(),
                    path: path.clone(),
                    body: body.clone(),
                });

                let reply = state.handle(&method, &path, body.as_ref());
                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    reply.content_type.as_bytes(),
                )
                .expect("build header");
                let response = tiny_http::Response::from_string(reply.body)
                    .with_status_code(reply.status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            api_base,
            calls,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, method: &str, path_fragment: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path.contains(path_fragment))
            .collect()
    }
}

impl Drop for BackendStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    fn sse(frames: &[Value]) -> Self {
        let body = frames
            .iter()
            .map(|frame| format!("data: {frame}\n\n"))
            .collect::<String>();
        Self {
            status: 200,
            content_type: "text/event-stream",
            body,
        }
    }

    fn not_found() -> Self {
        Self::json(404, json!({"detail": "Not Found"}))
    }
}

struct StubState {
    config: BackendStubConfig,
    deleted: HashSet<String>,
    single_created: HashSet<String>,
}

impl StubState {
    fn new(config: BackendStubConfig) -> Self {
        Self {
            config,
            deleted: HashSet::new(),
            single_created: HashSet::new(),
        }
    }

    fn handle(&mut self, method: &str, path: &str, body: Option<&Value>) -> Reply {
        let (route, _query) = path.split_once('?').unwrap_or((path, ""));
        let segments: Vec<&str> = route.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            ("GET", ["api", "outlines", "project", project_id]) => self.list(project_id),
            ("GET", ["api", "outlines", outline_id, "chapters"]) => self.chapters(outline_id),
            ("POST", ["api", "outlines", "batch-expand-stream"]) => self.batch_expand(body),
            ("POST", ["api", "outlines", outline_id, "expand-stream"]) => {
                self.expand(outline_id, body)
            }
            ("POST", ["api", "outlines", outline_id, "create-chapters-from-plans"]) => {
                self.create(outline_id, body)
            }
            ("POST", ["api", "outlines", outline_id, "create-single-chapter"]) => {
                self.create_single(outline_id)
            }
            ("DELETE", ["api", "chapters", chapter_id]) => {
                self.deleted.insert((*chapter_id).to_owned());
                Reply::json(200, json!({"message": "章节删除成功"}))
            }
            ("GET", ["repos", _owner, _repo, "commits"]) => {
                Reply::json(200, Value::Array(self.config.commits.clone()))
            }
            _ => Reply::not_found(),
        }
    }

    fn list(&self, project_id: &str) -> Reply {
        let items: Vec<Value> = self
            .config
            .outlines
            .iter()
            .map(|(id, order_index)| {
                json!({
                    "id": id,
                    "project_id": project_id,
                    "order_index": order_index,
                    "title": format!("第{order_index}卷"),
                    "content": "大纲内容",
                    "structure": json!({
                        "summary": "概要",
                        "characters": ["张三", {"name": "天剑门", "type": "organization"}],
                    }).to_string(),
                    "created_at": "2025-01-01T00:00:00",
                })
            })
            .collect();
        Reply::json(200, json!({"total": items.len(), "items": items}))
    }

    fn has_chapters(&self, outline_id: &str) -> bool {
        self.config.expanded.contains(outline_id)
            && !self.deleted.contains(&format!("{outline_id}-c1"))
    }

    fn chapters(&self, outline_id: &str) -> Reply {
        if !self.config.outlines.iter().any(|(id, _)| id == outline_id) {
            return Reply::json(404, json!({"detail": "大纲不存在"}));
        }
        if !self.has_chapters(outline_id) {
            return Reply::json(
                200,
                json!({
                    "has_chapters": false,
                    "outline_id": outline_id,
                    "chapter_count": 0,
                    "chapters": [],
                    "expansion_plans": null,
                }),
            );
        }
        Reply::json(
            200,
            json!({
                "has_chapters": true,
                "outline_id": outline_id,
                "chapter_count": 2,
                "chapters": [
                    {"id": format!("{outline_id}-c1"), "chapter_number": 1, "title": "一"},
                    {"id": format!("{outline_id}-c2"), "chapter_number": 2, "title": "二"},
                ],
                "expansion_plans": plans(outline_id, 2),
            }),
        )
    }

    fn expand(&self, outline_id: &str, body: Option<&Value>) -> Reply {
        let count = body
            .and_then(|b| b.get("target_chapter_count"))
            .and_then(Value::as_u64)
            .unwrap_or(3) as usize;
        if !self.config.outlines.iter().any(|(id, _)| id == outline_id) {
            return Reply::json(404, json!({"detail": "大纲不存在"}));
        }
        if self.config.failing_expansions.contains(outline_id) {
            return Reply::sse(&[
                json!({"type": "progress", "message": "开始", "progress": 5}),
                json!({"type": "error", "error": "AI分析失败，未能生成章节规划", "code": 500}),
            ]);
        }
        if self.config.truncated_expansions.contains(outline_id) {
            return Reply::sse(&[
                json!({"type": "progress", "message": "加载大纲信息...", "progress": 10}),
                json!({"type": "result", "data": expansion(outline_id, count)}),
            ]);
        }
        Reply::sse(&[
            json!({"type": "progress", "message": "加载大纲信息...", "progress": 10}),
            json!({"type": "chunk", "content": "..."}),
            json!({"type": "heartbeat"}),
            json!({"type": "progress", "message": "AI分析大纲...", "progress": 60}),
            json!({"type": "result", "data": expansion(outline_id, count)}),
            json!({"type": "done"}),
        ])
    }

    fn batch_expand(&self, body: Option<&Value>) -> Reply {
        let count = body
            .and_then(|b| b.get("chapters_per_outline"))
            .and_then(Value::as_u64)
            .unwrap_or(3) as usize;
        let mut results = Vec::new();
        let mut skipped = Vec::new();
        for (id, _) in &self.config.outlines {
            if self.has_chapters(id) {
                skipped.push(json!({"outline_id": id, "outline_title": id, "reason": "已展开"}));
            } else {
                results.push(expansion(id, count));
            }
        }
        Reply::sse(&[
            json!({"type": "progress", "message": "批量展开中", "progress": 50}),
            json!({"type": "result", "data": {
                "total_outlines_expanded": results.len(),
                "expansion_results": results,
                "skipped_outlines": skipped,
                "skipped_count": skipped.len(),
            }}),
            json!({"type": "done"}),
        ])
    }

    fn create(&self, outline_id: &str, body: Option<&Value>) -> Reply {
        if self.config.failing_commits.contains(outline_id) {
            return Reply::json(500, json!({"detail": format!("创建章节失败: {outline_id}")}));
        }
        let created = body
            .and_then(|b| b.get("chapter_plans"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Reply::json(
            200,
            json!({"outline_id": outline_id, "chapters_created": created}),
        )
    }
}

impl StubState {
    fn create_single(&mut self, outline_id: &str) -> Reply {
        let Some((_, order_index)) = self
            .config
            .outlines
            .iter()
            .find(|(id, _)| id == outline_id)
            .cloned()
        else {
            return Reply::json(404, json!({"detail": "大纲不存在"}));
        };
        if self.has_chapters(outline_id) || self.single_created.contains(outline_id) {
            return Reply::json(
                400,
                json!({"detail": format!("第{order_index}章已存在，不能重复创建")}),
            );
        }
        self.single_created.insert(outline_id.to_owned());
        Reply::json(
            200,
            json!({
                "message": "章节创建成功",
                "chapter": {
                    "id": format!("{outline_id}-single"),
                    "project_id": "p1",
                    "title": format!("第{order_index}卷"),
                    "summary": "大纲内容",
                    "chapter_number": order_index,
                    "sub_index": 1,
                    "outline_id": null,
                    "status": "pending",
                    "created_at": "2025-01-01T00:00:00",
                },
            }),
        )
    }
}

pub fn plans(outline_id: &str, count: usize) -> Value {
    Value::Array(
        (1..=count)
            .map(|idx| {
                json!({
                    "sub_index": idx,
                    "title": format!("{outline_id} 第{idx}节"),
                    "plot_summary": "情节",
                    "key_events": ["事件"],
                    "character_focus": ["张三"],
                    "emotional_tone": "紧张",
                    "narrative_goal": "推进",
                    "conflict_type": "外部",
                    "estimated_words": 3000,
                    "scenes": [{"location": "山门", "characters": ["张三"], "purpose": "开场"}],
                })
            })
            .collect(),
    )
}

fn expansion(outline_id: &str, count: usize) -> Value {
    json!({
        "outline_id": outline_id,
        "outline_title": format!("大纲 {outline_id}"),
        "target_chapter_count": count,
        "actual_chapter_count": count,
        "expansion_strategy": "balanced",
        "chapter_plans": plans(outline_id, count),
    })
}

pub fn outlines(ids: &[&str]) -> Vec<(String, i64)> {
    ids.iter()
        .enumerate()
        .map(|(idx, id)| ((*id).to_owned(), idx as i64 + 1))
        .collect()
}

pub fn set(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|id| (*id).to_owned()).collect()
}

pub fn commit_record(sha: &str, date: &str, message: &str) -> Value {
    json!({
        "sha": sha,
        "commit": {
            "author": {"name": "Mu", "email": "mu@example.com", "date": date},
            "message": message,
        },
        "html_url": format!("https://github.com/o/r/commit/{sha}"),
        "author": {"login": "mu", "avatar_url": "https://avatars.example/mu"},
    })
}
