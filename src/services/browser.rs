use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Standard,
    Stealth,
    BrightData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "visible" => Some(Visibility::Visible),
            "hidden" => Some(Visibility::Hidden),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("selector '{selector}' failed: {message}")]
    Selector { selector: String, message: String },
    #[error("timed out waiting for '{0}'")]
    Timeout(String),
    #[error("browser closed unexpectedly: {0}")]
    Closed(String),
}

/// Headless-browser collaborator. One driver per execution environment;
/// exactly one page is current and every operation acts on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError>;

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        visibility: Visibility,
        timeout_ms: u64,
    ) -> Result<bool, BrowserError>;

    async fn content(&mut self) -> Result<String, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Proxy-backed launches carry their credentials; the password arrives
/// already resolved and must not outlive the launch call.
#[derive(Debug, Clone)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn launch(
        &self,
        kind: BrowserKind,
        headless: bool,
        proxy: Option<ProxyCredentials>,
    ) -> Result<Box<dyn BrowserDriver>, BrowserError>;
}

/// Stand-in factory for hosts without a browser runtime; every launch is a
/// configuration error surfaced to the failing phase.
pub struct NoBrowserFactory;

#[async_trait]
impl BrowserFactory for NoBrowserFactory {
    async fn launch(
        &self,
        _kind: BrowserKind,
        _headless: bool,
        _proxy: Option<ProxyCredentials>,
    ) -> Result<Box<dyn BrowserDriver>, BrowserError> {
        Err(BrowserError::Launch(
            "no browser driver configured on this host".to_string(),
        ))
    }
}
