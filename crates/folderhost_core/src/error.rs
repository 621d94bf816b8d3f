use serde::Serialize;

/// How an error should be surfaced to connected clients.
///
/// Every error type in this crate reports one of these classes through a
/// `class()` method. The connection loop uses it to decide whether to answer
/// the sender, close the socket, or stay quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Bad range, bad path, size ceiling exceeded. Reported to the sender only.
    Validation,
    /// Missing capability. Reported to the sender with a typed message.
    Permission,
    /// Storage limit hit during an archive operation.
    Quota,
    /// Path escape. The offending connection is closed.
    Security,
    /// stat/read/write failure.
    TransientIo,
}

impl ErrorClass {
    /// Whether the connection that triggered the error must be dropped.
    pub fn closes_connection(self) -> bool {
        matches!(self, ErrorClass::Security)
    }
}
