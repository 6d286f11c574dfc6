/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field so call sites never spell the string
/// out. Domains: `sys` (lifecycle), `conn` (collaborator I/O), `pipe`
/// (execution), `res` (eviction, metrics), `conf` (configuration, binding).
///
/// ```ignore
/// fr_info!(sys, rules = 3, instances = 40, "rules host started");
/// fr_warn!(conn, error = %e, "telemetry query failed");
/// ```
///
/// The domain is a bare identifier, turned into a `&str` by the macro.

#[doc(hidden)]
macro_rules! fr_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

macro_rules! fr_error {
    ($domain:ident, $($rest:tt)*) => {
        fr_log!(error, $domain, $($rest)*)
    };
}

macro_rules! fr_warn {
    ($domain:ident, $($rest:tt)*) => {
        fr_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! fr_info {
    ($domain:ident, $($rest:tt)*) => {
        fr_log!(info, $domain, $($rest)*)
    };
}

macro_rules! fr_debug {
    ($domain:ident, $($rest:tt)*) => {
        fr_log!(debug, $domain, $($rest)*)
    };
}

#[allow(unused_macros)]
macro_rules! fr_trace {
    ($domain:ident, $($rest:tt)*) => {
        fr_log!(trace, $domain, $($rest)*)
    };
}
