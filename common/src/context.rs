/// Caller identity and request metadata, passed explicitly to every
/// boundary operation instead of being looked up from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub tenant_id: String,
    pub user_id: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Caller-supplied idempotency token, forwarded from the HTTP layer.
    pub operation_id: Option<String>,
}

impl RequestContext {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            client_ip: None,
            user_agent: None,
            operation_id: None,
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}
