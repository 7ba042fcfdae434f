//! Shared fixtures: an in-memory transport and a realistic landing page

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fca_core::http::{HttpRequest, HttpResponse, HttpTransport, Method};
use fca_core::{LoginFlow, LoginFlowBuilder, LoginOptions, TransportError};

pub const PAGE: &str = r#"<html><head>
<script type="application/json" data-sjs>{"require":[["DTSGInitialData",[],{"token":"NAcTEST:99"},258],["MqttWebConfig",[],{"fbid":"100000000000001","appID":219994525426954,"endpoint":"wss:\/\/edge-chat.facebook.com\/chat?region=prn&sid=1"},1],["MqttWebDeviceID",[],{"clientID":"client-test"},2]]}</script>
<script>x={"revision":1019999999,"foo":1};irisSeqID:"5",</script>
</head></html>"#;

pub const CHECKPOINT_PAGE: &str =
    r#"<html><a href="https://www.facebook.com/checkpoint/block/?next=https%3A%2F%2Fwww.facebook.com%2F">Continue</a></html>"#;

/// Serves one canned page for every request
pub struct FakeTransport {
    html: String,
    status: u16,
    delay: Option<Duration>,
    set_cookies: Vec<String>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            status: 200,
            delay: None,
            set_cookies: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_set_cookie(mut self, header: &str) -> Self {
        self.set_cookies.push(header.to_string());
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn respond(&self, request: HttpRequest, method: Method) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(HttpResponse {
            status_code: self.status,
            headers: self
                .set_cookies
                .iter()
                .map(|c| ("set-cookie".to_string(), c.clone()))
                .collect(),
            body: self.html.clone(),
            url: request.url,
            method,
        })
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.respond(request, Method::Get).await
    }

    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.respond(request, Method::Post).await
    }

    async fn post_form_data(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.respond(request, Method::Post).await
    }
}

/// Options whose token side file lives in a scratch directory
pub fn scratch_options(dir: &TempDir) -> LoginOptions {
    LoginOptions {
        token_store_path: Some(dir.path().join("fb_dtsg_data.json")),
        ..Default::default()
    }
}

/// Builder wired to `transport` with scratch options
pub fn builder(cookie: &str, transport: Arc<FakeTransport>, dir: &TempDir) -> LoginFlowBuilder {
    LoginFlow::builder(cookie)
        .options(scratch_options(dir))
        .transport(transport)
}
