//! Rate-limit key derivation.
//!
//! A key is `{normalized address}:{identity or "anonymous"}:{path}`. IPv6
//! addresses are cut down to their first four groups (the /64 a single
//! subscriber is usually allocated) so that rotating through one allocation
//! does not yield fresh buckets.

use std::net::IpAddr;
use std::sync::Arc;

use crate::http::request::ClientContext;

/// Custom key function for a limiter.
pub type KeyFn = Arc<dyn Fn(&ClientContext) -> String + Send + Sync>;

/// Address part of a rate-limit key.
pub fn normalize_addr(addr: IpAddr) -> String {
    match crate::security::proxy::canonical(addr) {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}:{:x}", s[0], s[1], s[2], s[3])
        }
    }
}

/// Default composite key.
pub fn rate_limit_key(ctx: &ClientContext) -> String {
    let identity = ctx
        .identity
        .as_ref()
        .map(|i| i.id.as_str())
        .unwrap_or("anonymous");
    format!("{}:{}:{}", normalize_addr(ctx.addr), identity, ctx.path)
}

/// The default key function as a [`KeyFn`].
pub fn default_key_fn() -> KeyFn {
    Arc::new(rate_limit_key)
}
