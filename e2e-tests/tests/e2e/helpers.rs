use serde_json::{json, Value};
use signal_rs::api::ApiServer;
use signal_rs::identity::IdentityStore;
use signal_rs::Config;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::client::SignalClient;

pub const ADMIN_TOKEN: &str = "e2e-admin-token";

/// A running server plus the credentials needed to drive it
pub struct TestEnv {
    pub base_url: String,
    pub sender_token: String,
    server: JoinHandle<()>,
    _db_file: NamedTempFile,
}

impl TestEnv {
    /// Start a server on an ephemeral port backed by a fresh database file
    pub async fn start() -> Result<Self, String> {
        let db_file = NamedTempFile::new().map_err(|e| format!("Failed to create db file: {}", e))?;

        let mut config = Config::default();
        config.server.listen_addr = "127.0.0.1:0".to_string();
        config.auth.admin_token = ADMIN_TOKEN.to_string();
        config.storage.database_url = format!("sqlite://{}", db_file.path().display());

        let pool = signal_rs::db::connect(&config.storage.database_url)
            .await
            .map_err(|e| format!("Failed to open database: {}", e))?;
        signal_rs::db::init_schema(&pool)
            .await
            .map_err(|e| format!("Failed to init schema: {}", e))?;

        let sender = IdentityStore::new(pool.clone(), &config.auth.sender_username)
            .ensure_sender(false)
            .await
            .map_err(|e| format!("Failed to create sender: {}", e))?
            .ok_or("Sender already existed on a fresh database")?;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| format!("Failed to bind: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to read local addr: {}", e))?;

        let server = ApiServer::new(pool, config);
        let handle = tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                tracing::error!("Server stopped: {}", e);
            }
        });

        let env = Self {
            base_url: format!("http://{}", addr),
            sender_token: sender.token,
            server: handle,
            _db_file: db_file,
        };
        env.wait_for_service(10).await?;
        Ok(env)
    }

    /// Wait for /health to answer
    pub async fn wait_for_service(&self, timeout_secs: u64) -> Result<(), String> {
        let client = reqwest::Client::new();
        let url = format!("{}/health", self.base_url);
        let start = std::time::Instant::now();

        loop {
            if start.elapsed().as_secs() > timeout_secs {
                return Err(format!("Timeout waiting for service: {}", url));
            }

            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => sleep(Duration::from_millis(50)).await,
            }
        }
    }

    pub fn sender(&self) -> SignalClient {
        SignalClient::new(&self.base_url, &self.sender_token)
    }

    pub fn admin(&self) -> SignalClient {
        SignalClient::new(&self.base_url, ADMIN_TOKEN)
    }

    /// Issue a receiver token and return a client authenticated with it
    pub async fn receiver(&self, username: &str, plan: &str) -> Result<SignalClient, String> {
        self.receiver_with(json!({ "username": username, "plan": plan })).await
    }

    pub async fn receiver_with(&self, request: Value) -> Result<SignalClient, String> {
        let (status, body) = self.admin().post("/admin/issue_token", &request).await?;
        if status != 200 {
            return Err(format!("issue_token returned {}: {}", status, body));
        }

        let token = body["token"]
            .as_str()
            .ok_or_else(|| format!("No token in response: {}", body))?;
        Ok(SignalClient::new(&self.base_url, token))
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Test result helper
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn success(name: String, duration: Duration) -> Self {
        Self {
            name,
            passed: true,
            message: "✅ Test passed".to_string(),
            duration,
        }
    }

    pub fn failure(name: String, message: String, duration: Duration) -> Self {
        Self {
            name,
            passed: false,
            message: format!("❌ Test failed: {}", message),
            duration,
        }
    }

    pub fn print(&self) {
        println!("\n{}", "=".repeat(80));
        println!("📝 Test: {}", self.name);
        println!("⏱️  Duration: {:?}", self.duration);
        println!("{}", self.message);
        println!("{}", "=".repeat(80));
    }
}

/// Unique username for a test run
pub fn generate_test_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("test_{}", millis)
}
