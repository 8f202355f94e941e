use schemars::JsonSchema;
use serde::Serialize;

/// Outcome of the last permission request, as seen by callers.
///
/// `NotRequested -> Requesting -> {Granted, Denied}`; only a fresh
/// permission request moves it again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    #[default]
    NotRequested,
    Requesting,
    /// At least one source is usable.
    Granted,
    Denied,
}
