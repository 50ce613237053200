//! Gateway Discovery Client (spec §4.4): a single-shot HTTP call returning
//! the websocket URL to dial.

use wavelink_rest::Rest;
use wavelink_types::GatewayIndexResponse;

use crate::decompress::DecompressMode;
use crate::error::{GatewayError, TransportError};

pub struct GatewayDiscovery {
    rest: Rest,
}

impl GatewayDiscovery {
    pub fn new(rest: Rest) -> Self {
        Self { rest }
    }

    /// Request the gateway URL. `dict_version` is only sent when `mode` is
    /// [`DecompressMode::ZstdPerMessage`].
    pub async fn request_gateway(
        &self,
        mode: DecompressMode,
        dict_version: Option<&str>,
    ) -> Result<String, GatewayError> {
        let route = build_route(mode, dict_version);

        let response: GatewayIndexResponse = self
            .rest
            .get(&route)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        if response.code != 0 || response.data.url.is_empty() {
            return Err(GatewayError::GatewayRejected {
                code: response.code,
                message: response.message.unwrap_or_default(),
            });
        }

        Ok(response.data.url)
    }
}

fn build_route(mode: DecompressMode, dict_version: Option<&str>) -> String {
    let compress = if matches!(mode, DecompressMode::None) { 0 } else { 1 };
    let mut route = format!("/gateway/index?compress={compress}");
    if matches!(mode, DecompressMode::ZstdPerMessage) {
        let version = dict_version.unwrap_or("0");
        route.push_str(&format!("&compress-type=zstd&dict-version={version}"));
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_for_no_compression() {
        assert_eq!(build_route(DecompressMode::None, None), "/gateway/index?compress=0");
    }

    #[test]
    fn route_for_zlib_stream() {
        assert_eq!(
            build_route(DecompressMode::ZlibStream, None),
            "/gateway/index?compress=1"
        );
    }

    #[test]
    fn route_for_zstd_per_message_includes_dict_version() {
        assert_eq!(
            build_route(DecompressMode::ZstdPerMessage, Some("3")),
            "/gateway/index?compress=1&compress-type=zstd&dict-version=3"
        );
    }
}
