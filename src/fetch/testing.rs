//! Canned [`HttpClient`] for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use super::client::HttpClient;

#[derive(Clone)]
struct Canned {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

/// Routes requests by longest URL prefix. Each route is a queue of responses;
/// the last one repeats once the queue drains. Unrouted URLs get a 404.
#[derive(Default)]
pub struct MockClient {
    routes: Mutex<HashMap<String, VecDeque<Canned>>>,
    calls: Mutex<Vec<String>>,
    last_headers: Mutex<Option<HeaderMap>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, prefix: &str, status: u16, body: &str) -> Self {
        self.route_with_headers(prefix, status, &[], body)
    }

    pub fn route_with_headers(
        self,
        prefix: &str,
        status: u16,
        headers: &[(&str, &str)],
        body: &str,
    ) -> Self {
        let canned = Canned {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        };
        self.routes
            .lock()
            .unwrap()
            .entry(prefix.to_string())
            .or_default()
            .push_back(canned);
        self
    }

    /// Number of requests whose URL starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.starts_with(prefix))
            .count()
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.last_headers.lock().unwrap().clone()
    }

    fn next_response(&self, url: &str) -> Canned {
        let mut routes = self.routes.lock().unwrap();
        let key = routes
            .keys()
            .filter(|prefix| url.starts_with(prefix.as_str()))
            .max_by_key(|prefix| prefix.len())
            .cloned();

        let Some(key) = key else {
            return Canned {
                status: 404,
                headers: Vec::new(),
                body: String::new(),
            };
        };

        let queue = routes.get_mut(&key).unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let url = req.url().to_string();
        self.calls.lock().unwrap().push(url.clone());
        *self.last_headers.lock().unwrap() = Some(req.headers().clone());

        let canned = self.next_response(&url);
        let mut builder = http::Response::builder().status(canned.status);
        for (name, value) in &canned.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp = builder.body(canned.body.into_bytes()).unwrap();
        Ok(reqwest::Response::from(resp))
    }
}
