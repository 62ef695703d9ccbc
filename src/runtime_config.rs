//! Environment variable based runtime configuration.
//!
//! Loaded once at startup and shared with the dispatcher. The settings
//! cover the coroutine runtime, debug behavior and the defaults used when
//! constructing request contexts.
//!
//! ## Environment Variables
//!
//! - `TRELLIS_STACK_SIZE` - stack size for preprocessor coroutines, decimal
//!   (`16384`) or hexadecimal (`0x4000`). Default: `0x4000` (16 KB).
//! - `TRELLIS_DEBUG` - `1`/`true` enables debug mode: the `/__debug__/`
//!   interface answers, and error responses carry full detail instead of
//!   the generic error page.
//! - `TRELLIS_ADDR` - bind address. Default: `127.0.0.1` in debug mode,
//!   `0.0.0.0` otherwise.
//! - `TRELLIS_PORT` - bind port. Default: `9999`.
//! - `TRELLIS_DEFAULT_LANG` - locale used when negotiation finds no match.
//!   Default: `en`.

use std::env;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Stack size for preprocessor coroutines in bytes (default: 16 KB / 0x4000)
    pub stack_size: usize,
    /// Debug mode: verbose error payloads and the `/__debug__/` interface
    pub debug: bool,
    /// Address the HTTP server binds to
    pub address: String,
    /// Port the HTTP server binds to
    pub port: u16,
    /// Locale used when `Accept-Language` negotiation yields nothing
    pub default_language: String,
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let stack_size = match env::var("TRELLIS_STACK_SIZE") {
            Ok(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(0x4000)
                } else {
                    val.parse().unwrap_or(0x4000)
                }
            }
            Err(_) => 0x4000,
        };
        let debug = matches!(
            env::var("TRELLIS_DEBUG").as_deref(),
            Ok("1") | Ok("true") | Ok("TRUE")
        );
        let address = env::var("TRELLIS_ADDR").unwrap_or_else(|_| {
            if debug {
                "127.0.0.1".to_string()
            } else {
                "0.0.0.0".to_string()
            }
        });
        let port = env::var("TRELLIS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9999);
        let default_language =
            env::var("TRELLIS_DEFAULT_LANG").unwrap_or_else(|_| "en".to_string());
        RuntimeConfig {
            stack_size,
            debug,
            address,
            port,
            default_language,
        }
    }

    /// The `address:port` pair to bind the HTTP server to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
