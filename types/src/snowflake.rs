/// Opaque platform identifier (user, channel, message). Transmitted as a
/// JSON string; the gateway engine never interprets its internal structure.
pub type Snowflake = String;
