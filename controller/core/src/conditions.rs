//! Condition types, reasons and message formatting shared by status reports.

pub const ACCEPTED: &str = "Accepted";
pub const RESOLVED_REFS: &str = "ResolvedRefs";
pub const PROGRAMMED: &str = "Programmed";

pub mod reasons {
    pub const ACCEPTED: &str = "Accepted";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    pub const PROGRAMMED: &str = "Programmed";
    pub const INVALID: &str = "Invalid";
    pub const BACKEND_NOT_FOUND: &str = "BackendNotFound";
    pub const INVALID_KIND: &str = "InvalidKind";
    pub const REF_NOT_PERMITTED: &str = "RefNotPermitted";
    pub const NO_MATCHING_PARENT: &str = "NoMatchingParent";
    pub const NOT_ALLOWED_BY_LISTENERS: &str = "NotAllowedByListeners";
    pub const UNSUPPORTED_PROTOCOL: &str = "UnsupportedProtocol";
    pub const CONFLICTED: &str = "Conflicted";
    pub const TARGET_NOT_FOUND: &str = "TargetNotFound";
}

/// Formats a list of errors into a single condition message.
///
/// One error renders as `error: <msg>`; several as
/// `<Kind> has N errors: <m1>; <m2>`. No errors yield `None`.
pub fn errors_message(kind: &str, errors: &[String]) -> Option<String> {
    match errors {
        [] => None,
        [error] => Some(format!("error: {error}")),
        errors => Some(format!(
            "{kind} has {} errors: {}",
            errors.len(),
            errors.join("; ")
        )),
    }
}
