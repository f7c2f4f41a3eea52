use serde_json::Value;

/// Token-authenticated HTTP client for the relay
#[derive(Clone)]
pub struct SignalClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

/// A fetch response, with the quota headers pulled out
#[derive(Debug)]
pub struct FetchResult {
    pub status: u16,
    pub body: Value,
    pub quota_limit: Option<String>,
    pub quota_remaining: Option<String>,
}

impl FetchResult {
    pub fn signal_ids(&self) -> Vec<i64> {
        self.body["signals"]
            .as_array()
            .map(|signals| signals.iter().filter_map(|s| s["id"].as_i64()).collect())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.body["signals"]
            .as_array()
            .map(|signals| {
                signals
                    .iter()
                    .filter_map(|s| s["action"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl SignalClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn get(&self, path: &str) -> Result<(u16, Value), String> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| format!("GET {} failed: {}", path, e))?;
        Self::decode(resp).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<(u16, Value), String> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("POST {} failed: {}", path, e))?;
        Self::decode(resp).await
    }

    /// Publish a signal and return its id
    pub async fn publish(&self, symbol: &str, action: &str) -> Result<i64, String> {
        let (status, body) = self
            .post("/signals", &serde_json::json!({ "symbol": symbol, "action": action }))
            .await?;
        if status != 201 {
            return Err(format!("publish returned {}: {}", status, body));
        }
        body["id"]
            .as_i64()
            .ok_or_else(|| format!("No id in response: {}", body))
    }

    pub async fn fetch(&self, query: &str) -> Result<FetchResult, String> {
        let resp = self
            .http
            .get(format!("{}/signals{}", self.base_url, query))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| format!("fetch failed: {}", e))?;

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let quota_limit = header("x-quota-limit");
        let quota_remaining = header("x-quota-remaining");

        let (status, body) = Self::decode(resp).await?;
        Ok(FetchResult {
            status,
            body,
            quota_limit,
            quota_remaining,
        })
    }

    async fn decode(resp: reqwest::Response) -> Result<(u16, Value), String> {
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("Failed to read body: {}", e))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, body))
    }
}
