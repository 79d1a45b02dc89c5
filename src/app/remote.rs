use anyhow::bail;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    backend::{AppBackend, AppFuture},
    messages::{Message, Reply},
};

/// Talks to a running daemon's message endpoint.
pub struct AppRemote {
    remote_addr: String,
    client: reqwest::Client,
}

impl AppRemote {
    pub fn new(addr: &str) -> AppRemote {
        let remote_addr = addr.strip_suffix('/').unwrap_or(addr).to_string();

        AppRemote {
            remote_addr,
            client: reqwest::Client::new(),
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        log::debug!("{}{}", self.remote_addr, url);
        self.client.post(format!("{}{}", self.remote_addr, url))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum WebResponse<T> {
    Error { error: String },
    Data(T),
}

async fn handle_response<T>(response: reqwest::Response) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let text = response.text().await?;

    let web_response = serde_json::from_str::<WebResponse<T>>(&text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        err
    })?;

    match web_response {
        WebResponse::Data(data) => Ok(data),
        WebResponse::Error { error } => {
            bail!(error)
        }
    }
}

impl AppBackend for AppRemote {
    fn handle(&self, message: Message) -> AppFuture<'_, Reply> {
        Box::pin(async move {
            let resp = self.post("/api/message").json(&message).send().await?;
            Ok(handle_response(resp).await?)
        })
    }
}
