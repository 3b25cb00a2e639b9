pub mod backend;
pub mod factory;
pub mod request;
pub mod request_gateway;
pub mod response;

pub use backend::{EngineBackend, EngineJob, EngineOutput, InProcessBackend, SubprocessBackend};
pub use factory::GatewayFactory;
pub use request::InferenceRequest;
pub use request_gateway::RequestGateway;
pub use response::{GatewayResponse, HealthStatus, InferenceData};
