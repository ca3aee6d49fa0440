//! Typed Rust client for the Fly.io Machines API.
//!
//! Covers the subset a VM backend needs: the owning app and its machines
//! (list, create, delete) plus per-machine metadata used to track lifetimes.

mod types;

pub use types::*;

const BASE_URL: &str = "https://api.machines.dev/v1";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fly api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("fly api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the Fly.io Machines REST API, scoped to a single app.
#[derive(Clone)]
pub struct FlyClient {
    token: String,
    app: String,
    http: reqwest::Client,
}

impl FlyClient {
    pub fn new(token: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            app: app.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    fn url(&self, path: &str) -> String {
        format!("{BASE_URL}/apps/{}{path}", self.app)
    }

    /// Authenticate and send `req`. Non-2xx responses become [`Error::Api`]
    /// tagged with `endpoint`.
    async fn send(&self, req: reqwest::RequestBuilder, endpoint: &'static str) -> Result<reqwest::Response> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Api { endpoint, status, body })
    }

    /// Fetch the app this client is scoped to, including its organization.
    pub async fn get_app(&self) -> Result<App> {
        let resp = self.send(self.http.get(self.url("")), "get app").await?;
        Ok(resp.json().await?)
    }

    pub async fn list_machines(&self) -> Result<Vec<Machine>> {
        let resp = self
            .send(self.http.get(self.url("/machines")), "list machines")
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn create_machine(&self, req: &CreateMachineRequest) -> Result<Machine> {
        let resp = self
            .send(self.http.post(self.url("/machines")).json(req), "create machine")
            .await?;
        Ok(resp.json().await?)
    }

    /// Force-destroy a machine, stopping it first if it is running. A machine
    /// that is already gone counts as destroyed.
    pub async fn delete_machine(&self, machine_id: &str) -> Result<()> {
        let req = self
            .http
            .delete(self.url(&format!("/machines/{machine_id}")))
            .query(&[("force", "true")]);

        match self.send(req, "delete machine").await {
            Ok(_) => Ok(()),
            Err(Error::Api { status, .. }) if status == reqwest::StatusCode::NOT_FOUND => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Store `value` under `key` in the machine's metadata.
    pub async fn set_metadata(&self, machine_id: &str, key: &str, value: &str) -> Result<()> {
        let req = self
            .http
            .post(self.url(&format!("/machines/{machine_id}/metadata/{key}")))
            .json(&serde_json::json!({ "value": value }));

        self.send(req, "set metadata").await?;
        Ok(())
    }
}
