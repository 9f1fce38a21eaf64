/// Outcome of asking the external licensing/quota collaborator whether a
/// batch may start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    /// Denied with a user-facing reason (e.g. free quota exhausted)
    Denied(String),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed)
    }
}

/// Opaque gate consulted once per `start()`, before any job is admitted.
///
/// The orchestrator only sees pass/fail plus a reason; license state machines,
/// device locks and quota ledgers live entirely behind this trait.
pub trait AdmissionGate: Send {
    fn check_admission(&self, file_count: usize) -> AdmissionDecision;
}

/// Gate that admits everything; the default for unrestricted builds and tests.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AdmissionGate for AllowAll {
    fn check_admission(&self, _file_count: usize) -> AdmissionDecision {
        AdmissionDecision::Allowed
    }
}
