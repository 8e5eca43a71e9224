use serde::{Deserialize, Serialize};

/// Processing state reported by the store for a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    New,
    Preparing,
    Prepared,
    Uploading,
    Uploaded,
    Processing,
    Processed,
    Ready,
    Error,
    Cancelled,
    /// Any state this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl DeployState {
    /// True once the store has diffed the manifest and knows what it needs.
    pub fn is_diffed(self) -> bool {
        matches!(
            self,
            Self::Prepared | Self::Uploading | Self::Uploaded | Self::Ready
        )
    }

    /// True for states a deploy never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Cancelled)
    }
}

/// A deploy as returned by `createDeploy`, `updateDeploy` and `getDeploy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub site_id: String,
    pub state: DeployState,
    /// Manifest paths the store does not hold yet.
    #[serde(default)]
    pub required: Vec<String>,
    /// Function names the store does not hold yet.
    #[serde(default)]
    pub required_functions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_ssl_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_url: Option<String>,
}

impl DeployRecord {
    /// Creates a record with no required content and no URLs.
    pub fn new(id: impl Into<String>, state: DeployState) -> Self {
        Self {
            id: id.into(),
            site_id: String::new(),
            state,
            required: Vec::new(),
            required_functions: Vec::new(),
            error_message: None,
            url: None,
            ssl_url: None,
            deploy_url: None,
            deploy_ssl_url: None,
            admin_url: None,
        }
    }

    /// URL the deploy is reachable at.
    ///
    /// Draft deploys live on their own permalink; production deploys are
    /// served from the site URL.
    pub fn live_url(&self, draft: bool) -> Option<&str> {
        let (secure, plain) = if draft {
            (&self.deploy_ssl_url, &self.deploy_url)
        } else {
            (&self.ssl_url, &self.url)
        };
        secure.as_deref().or(plain.as_deref())
    }
}

/// A cron schedule attached to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSchedule {
    pub name: String,
    pub cron: String,
}

/// Per-function settings sent alongside the function manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl FunctionConfig {
    /// True when none of the fields carry a value.
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.generator.is_none()
            && self.routes.is_empty()
            && self.build_data.is_none()
    }
}
