//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the four agents and the device
//! surface. They hold no I/O handles and serialize to the JSON artifacts written
//! for each session.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Raised before the loop starts when the session input cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Optional caller-supplied hints that steer goal classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Natural-language test objective. Created once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub text: String,
    #[serde(default)]
    pub hints: GoalHints,
}

impl Goal {
    /// Validate and normalize raw goal text.
    pub fn parse(text: &str, hints: GoalHints) -> Result<Self, ConfigError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConfigError::new("goal must be non-empty"));
        }
        Ok(Self {
            text: text.to_string(),
            hints,
        })
    }
}

/// Coarse application area a goal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Wifi,
    Bluetooth,
    AirplaneMode,
    Alarm,
    EmailSearch,
    Fallback,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Wifi => "wifi",
            Domain::Bluetooth => "bluetooth",
            Domain::AirplaneMode => "airplane_mode",
            Domain::Alarm => "alarm",
            Domain::EmailSearch => "email_search",
            Domain::Fallback => "fallback",
        }
    }
}

/// Value carried by stateful elements (switches, text fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementValue {
    On,
    Off,
    Text(String),
}

impl ElementValue {
    /// Opposite switch position. Text values have none.
    pub fn flipped(&self) -> Option<ElementValue> {
        match self {
            ElementValue::On => Some(ElementValue::Off),
            ElementValue::Off => Some(ElementValue::On),
            ElementValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ElementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementValue::On => f.write_str("on"),
            ElementValue::Off => f.write_str("off"),
            ElementValue::Text(text) => write!(f, "{text:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Button,
    Switch,
    Text,
    TextField,
    Dialog,
    ListItem,
    Icon,
    Other,
}

/// Screen rectangle in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn centroid(&self) -> Point {
        Point {
            x: (self.left + self.right) / 2,
            y: (self.top + self.bottom) / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

fn default_interactable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiElement {
    pub id: String,
    pub kind: ElementKind,
    pub label: String,
    pub bounds: Bounds,
    #[serde(default = "default_interactable")]
    pub interactable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ElementValue>,
}

/// Why the Executor produced a synthetic after-state instead of a device reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    EntryUnmet,
    BlockedByModal,
    NoTarget,
    DeviceTimeout,
    DeviceError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSignal {
    pub kind: SignalKind,
    pub detail: String,
}

/// Snapshot of the application surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    pub modal: String,
    #[serde(default)]
    pub elements: Vec<UiElement>,
    /// Only set on synthetic failure states; devices never report one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<ExecutionSignal>,
}

impl UiState {
    pub fn new(modal: impl Into<String>, elements: Vec<UiElement>) -> Self {
        Self {
            modal: modal.into(),
            elements,
            signal: None,
        }
    }

    /// Copy of this state tagged with an execution signal.
    pub fn with_signal(&self, kind: SignalKind, detail: impl Into<String>) -> Self {
        Self {
            modal: self.modal.clone(),
            elements: self.elements.clone(),
            signal: Some(ExecutionSignal {
                kind,
                detail: detail.into(),
            }),
        }
    }

    /// Drop any synthetic signal, leaving the observed surface.
    pub fn settled(mut self) -> Self {
        self.signal = None;
        self
    }

    pub fn element(&self, id: &str) -> Option<&UiElement> {
        self.elements.iter().find(|element| element.id == id)
    }

    pub fn dialogs(&self) -> impl Iterator<Item = &UiElement> {
        self.elements
            .iter()
            .filter(|element| element.kind == ElementKind::Dialog)
    }

    /// True when the visible surface (modal and elements) is identical.
    pub fn same_surface(&self, other: &UiState) -> bool {
        self.modal == other.modal && self.elements == other.elements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tap,
    Navigate,
    Toggle,
    Type,
    Scroll,
    Back,
    Dismiss,
    Verify,
    NoOp,
}

impl ActionKind {
    /// Actions after which an unchanged surface means the UI did not react.
    pub fn expects_change(self) -> bool {
        matches!(
            self,
            ActionKind::Tap
                | ActionKind::Navigate
                | ActionKind::Type
                | ActionKind::Back
                | ActionKind::Dismiss
        )
    }
}

/// Semantic action token attached to a subgoal before grounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub kind: ActionKind,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ElementValue>,
}

impl RequiredAction {
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: ElementValue) -> Self {
        self.value = Some(value);
        self
    }
}

/// Condition over a UI state, used for entry and success checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    ModalIs { modal: String },
    ElementPresent { label: String },
    ElementAbsent { label: String },
    ElementValue { label: String, value: ElementValue },
    NoDialog,
}

/// Modal id that matches any screen.
pub const ANY_MODAL: &str = "any";

/// Unit of planned work. Shared between plan revisions and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subgoal {
    pub id: String,
    pub description: String,
    /// Modal the subgoal starts from.
    pub modal_context: String,
    /// Modal the subgoal is expected to end on, or [`ANY_MODAL`].
    pub target_modal: String,
    pub required_actions: Vec<RequiredAction>,
    #[serde(default)]
    pub success_criteria: Vec<Predicate>,
    #[serde(default)]
    pub entry_conditions: Vec<Predicate>,
    #[serde(default)]
    pub blocking_modals: BTreeSet<String>,
    /// Id of the subgoal a corrective subgoal was inserted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Subgoal {
    /// Id charged for retries: the origin for corrective subgoals, else self.
    pub fn retry_key(&self) -> &str {
        self.origin.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgoalStatus {
    Pending,
    InProgress,
    Passed,
    FailedRetryable,
    FailedTerminal,
}

impl SubgoalStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, SubgoalStatus::Passed | SubgoalStatus::FailedTerminal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgoalProgress {
    pub status: SubgoalStatus,
    /// Index into `required_actions` of the next action to ground.
    pub next_action: usize,
}

impl Default for SubgoalProgress {
    fn default() -> Self {
        Self {
            status: SubgoalStatus::Pending,
            next_action: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub subgoal: Arc<Subgoal>,
    pub progress: SubgoalProgress,
}

impl PlanStep {
    pub fn new(subgoal: Subgoal) -> Self {
        Self {
            subgoal: Arc::new(subgoal),
            progress: SubgoalProgress::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanConfidence {
    Normal,
    Low,
}

/// One entry of the append-only adaptation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationRecord {
    /// Plan revision produced by this adaptation.
    pub revision: u32,
    pub subgoal_index: usize,
    pub subgoal_id: String,
    pub strategy: Strategy,
    pub trigger: BugKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted: Option<String>,
}

/// Ordered subgoal sequence plus adaptation bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: Arc<Goal>,
    pub domain: Domain,
    pub confidence: PlanConfidence,
    pub revision: u32,
    pub steps: Vec<PlanStep>,
    pub adaptation_history: Vec<AdaptationRecord>,
    /// Adaptations charged per retry key.
    pub retries: BTreeMap<String, u32>,
}

impl Plan {
    /// Index of the single active step: the first one not yet settled.
    pub fn active_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| !step.progress.status.is_settled())
    }

    pub fn subgoal_ids(&self) -> Vec<&str> {
        self.steps
            .iter()
            .map(|step| step.subgoal.id.as_str())
            .collect()
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.subgoal.id == id)
    }
}

/// Element identity recorded with a grounded action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef {
    pub id: String,
    pub label: String,
}

/// Concrete device-level action produced by grounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundedAction {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ElementRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ElementValue>,
}

impl GroundedAction {
    pub fn untargeted(kind: ActionKind) -> Self {
        Self {
            kind,
            target: None,
            coordinates: None,
            value: None,
        }
    }

    pub fn on(kind: ActionKind, element: &UiElement) -> Self {
        Self {
            kind,
            target: Some(ElementRef {
                id: element.id.clone(),
                label: element.label.clone(),
            }),
            coordinates: Some(element.bounds.centroid()),
            value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BugKind {
    MissingExpectedScreen,
    ToggleStateMismatch,
    BlockingDialog,
    Crash,
    PermissionBlock,
    NetworkError,
    UiFreeze,
    ElementNotFound,
    DeviceTimeout,
    DeviceError,
    UnmetCriteria,
}

impl BugKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BugKind::MissingExpectedScreen => "missing-expected-screen",
            BugKind::ToggleStateMismatch => "toggle-state-mismatch",
            BugKind::BlockingDialog => "blocking-dialog",
            BugKind::Crash => "crash",
            BugKind::PermissionBlock => "permission-block",
            BugKind::NetworkError => "network-error",
            BugKind::UiFreeze => "ui-freeze",
            BugKind::ElementNotFound => "element-not-found",
            BugKind::DeviceTimeout => "device-timeout",
            BugKind::DeviceError => "device-error",
            BugKind::UnmetCriteria => "unmet-criteria",
        }
    }
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    DismissAndRetry,
    NavigateCorrection,
    RetryAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    pub kind: BugKind,
    pub severity: Severity,
    pub description: String,
    pub remediation: Strategy,
}

/// Instruction from the Verifier to the Planner.
///
/// Deliberately not `Clone`: `Planner::adapt` takes it by value, so a request
/// is consumed at most once.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplanningRequest {
    pub strategy: Strategy,
    pub subgoal_index: usize,
    pub trigger: BugKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Outcome of verifying one action.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verdict: Verdict,
    pub confidence: f64,
    pub bugs: Vec<Bug>,
    pub criteria_passed: usize,
    pub criteria_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replanning: Option<ReplanningRequest>,
}

impl VerificationResult {
    /// Split into the traceable record and the single-use replanning request.
    pub fn into_parts(self) -> (VerificationRecord, Option<ReplanningRequest>) {
        let record = VerificationRecord {
            verdict: self.verdict,
            confidence: self.confidence,
            bugs: self.bugs,
            criteria_passed: self.criteria_passed,
            criteria_total: self.criteria_total,
            strategy: self.replanning.as_ref().map(|request| request.strategy),
        };
        (record, self.replanning)
    }
}

/// Verification as stored in the trace, without the consumable request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub verdict: Verdict,
    pub confidence: f64,
    pub bugs: Vec<Bug>,
    pub criteria_passed: usize,
    pub criteria_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
}

/// One executed action with its before/after states and verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub sequence: u32,
    pub subgoal_id: String,
    pub plan_revision: u32,
    pub action: GroundedAction,
    pub before: UiState,
    pub after: UiState,
    pub verification: VerificationRecord,
    pub duration_ms: u64,
    /// False when the action was answered without a device call.
    #[serde(default)]
    pub dispatched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Why the session loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    PlanExhausted,
    TerminalFailure { subgoal_id: String },
    MaxRounds { rounds: u32 },
    DeadlineExceeded,
    Cancelled,
}

impl StopReason {
    /// Session status implied by the stop reason and any terminal failures.
    pub fn status(&self, terminal_failures: usize) -> SessionStatus {
        match self {
            StopReason::PlanExhausted if terminal_failures == 0 => SessionStatus::Completed,
            StopReason::PlanExhausted
            | StopReason::TerminalFailure { .. }
            | StopReason::MaxRounds { .. } => SessionStatus::Failed,
            StopReason::DeadlineExceeded | StopReason::Cancelled => SessionStatus::Cancelled,
        }
    }
}

/// Summary produced by the Supervisor when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub goal: String,
    pub status: SessionStatus,
    pub stop_reason: StopReason,
    pub domain: Domain,
    pub plan_confidence: PlanConfidence,
    pub device_kind: String,
    pub subgoals_attempted: usize,
    pub subgoals_passed: usize,
    pub terminal_failures: Vec<String>,
    pub pass_rate: f64,
    pub bug_counts: BTreeMap<BugKind, usize>,
    pub adaptation_count: usize,
    /// Adaptations whose failed subgoal later passed.
    pub successful_recoveries: usize,
    /// `successful_recoveries / adaptation_count`, 0 without adaptations.
    pub recovery_rate: f64,
    pub mean_step_duration_ms: f64,
    pub frames_recorded: usize,
    /// Frames whose action reached the device.
    pub device_calls: usize,
    pub modal_transitions: u32,
}
