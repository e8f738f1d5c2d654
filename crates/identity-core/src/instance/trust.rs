//! Static host trust table.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Default instance discovery host
pub const DEFAULT_TRUSTED_HOST: &str = "login.microsoftonline.com";

/// Cloud hosts that never require server-side instance validation
static TRUSTED_HOSTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        DEFAULT_TRUSTED_HOST,
        "login.chinacloudapi.cn",
        "login.microsoftonline.de",
        "login-us.microsoftonline.com",
        "login.microsoftonline.us",
        "login.usgovcloudapi.net",
    ]
    .into_iter()
    .collect()
});

/// Tenant names that do not identify a concrete directory
const TENANTLESS_TENANT_NAMES: [&str; 3] = ["common", "organizations", "consumers"];

/// Whether `host` is in the static trusted host list (case-insensitive)
pub fn is_trusted_host(host: &str) -> bool {
    TRUSTED_HOSTS.contains(host.to_ascii_lowercase().as_str())
}

/// Whether `tenant` is a tenant-less name such as `common`
pub fn is_tenantless(tenant: &str) -> bool {
    TENANTLESS_TENANT_NAMES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(tenant))
}
