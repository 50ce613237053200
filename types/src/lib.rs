pub mod errors;
pub mod gateway;
pub mod snowflake;

pub use errors::{ApiErrorBody, ApiFieldError, RateLimitErrorBody};
pub use gateway::{
    EventPayload, Frame, GatewayIndexData, GatewayIndexResponse, HelloData, MessageType,
    SignalType, UnknownSignalType,
};
pub use snowflake::Snowflake;
