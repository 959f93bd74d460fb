//! Goal decomposition and dynamic replanning.
//!
//! Every operation consumes a [`Plan`] and returns a new one. Untouched
//! subgoals stay shared (`Arc`) between revisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::modal::{ModalBelief, dismiss_label};
use crate::core::predicate::canonical_label;
use crate::core::templates::{
    alarm_time, blocking_modals, classify, fallback_target, route, route_actions, search_query,
    toggle_label, toggle_sequence,
};
use crate::core::types::{
    ANY_MODAL, ActionKind, AdaptationRecord, Domain, ElementValue, Goal, Plan, PlanConfidence,
    PlanStep, Predicate, ReplanningRequest, RequiredAction, Strategy, Subgoal, SubgoalStatus,
    UiState,
};

/// Default per-subgoal retry budget.
pub const DEFAULT_RETRY_BUDGET: u32 = 2;

/// Result of [`Planner::adapt`].
#[derive(Debug, Clone, PartialEq)]
pub enum AdaptOutcome {
    /// One corrective adaptation was applied and recorded.
    Adapted(Plan),
    /// The retry budget was spent; the subgoal is now `failed_terminal`.
    Exhausted(Plan),
}

impl AdaptOutcome {
    pub fn into_plan(self) -> Plan {
        match self {
            AdaptOutcome::Adapted(plan) | AdaptOutcome::Exhausted(plan) => plan,
        }
    }
}

/// Goal decomposition and replanning, plus the Modal-State Tracker belief
/// folded from every state the session observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Planner {
    retry_budget: u32,
    belief: ModalBelief,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BUDGET)
    }
}

impl Planner {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            retry_budget,
            belief: ModalBelief::default(),
        }
    }

    pub fn belief(&self) -> &ModalBelief {
        &self.belief
    }

    /// Fold an observed state into the modal belief.
    pub fn observe(&mut self, state: &UiState) {
        self.belief = std::mem::take(&mut self.belief).observe(state);
    }

    /// Decompose `goal` into an ordered plan. Never fails: unrecognized goals
    /// get a single best-effort subgoal and low confidence.
    ///
    /// Starts a fresh modal belief from `initial_state`.
    #[instrument(skip_all, fields(goal = %goal.text))]
    pub fn generate_plan(&mut self, goal: &Goal, initial_state: &UiState) -> Plan {
        let domain = classify(goal);
        self.belief = ModalBelief::default().observe(initial_state);
        let start = self.belief.current().to_string();
        let (subgoals, confidence) = match domain {
            Domain::Wifi | Domain::Bluetooth | Domain::AirplaneMode => {
                (toggle_plan(domain, goal, &start, initial_state), PlanConfidence::Normal)
            }
            Domain::Alarm => (alarm_plan(goal, &start), PlanConfidence::Normal),
            Domain::EmailSearch => (email_plan(goal, &start), PlanConfidence::Normal),
            Domain::Fallback => (vec![fallback_subgoal(goal, &start)], PlanConfidence::Low),
        };
        info!(
            domain = domain.as_str(),
            subgoals = subgoals.len(),
            ?confidence,
            "plan generated"
        );
        Plan {
            goal: Arc::new(goal.clone()),
            domain,
            confidence,
            revision: 0,
            steps: subgoals.into_iter().map(PlanStep::new).collect(),
            adaptation_history: Vec::new(),
            retries: BTreeMap::new(),
        }
    }

    /// Mark the step at `index` as in progress.
    pub fn begin(&self, mut plan: Plan, index: usize) -> Plan {
        if let Some(step) = plan.steps.get_mut(index) {
            step.progress.status = SubgoalStatus::InProgress;
        }
        plan
    }

    /// Move the action cursor of the step at `index` forward by one.
    pub fn advance_action(&self, mut plan: Plan, index: usize) -> Plan {
        if let Some(step) = plan.steps.get_mut(index) {
            step.progress.next_action += 1;
        }
        plan
    }

    /// Mark the step at `index` as passed.
    pub fn complete(&self, mut plan: Plan, index: usize) -> Plan {
        if let Some(step) = plan.steps.get_mut(index) {
            step.progress.status = SubgoalStatus::Passed;
            step.progress.next_action = step.subgoal.required_actions.len();
        }
        plan
    }

    /// Apply a replanning request for the failed subgoal at `subgoal_index`.
    ///
    /// Retries are charged to the subgoal's retry key (its origin for
    /// corrective subgoals). Once the budget is spent the subgoal becomes
    /// `failed_terminal`, the plan advances past it, and the history is left
    /// untouched. Otherwise exactly one history record is appended.
    ///
    /// `current_state` is folded into the modal belief first; corrective
    /// subgoals start from the modal the belief reports.
    #[instrument(skip_all, fields(subgoal_index = subgoal_index, strategy = ?request.strategy))]
    pub fn adapt(
        &mut self,
        mut plan: Plan,
        subgoal_index: usize,
        request: ReplanningRequest,
        current_state: &UiState,
    ) -> Result<AdaptOutcome> {
        if request.subgoal_index != subgoal_index {
            bail!(
                "replanning request targets subgoal {} but adapt was called for {}",
                request.subgoal_index,
                subgoal_index
            );
        }
        let Some(step) = plan.steps.get(subgoal_index) else {
            bail!(
                "subgoal index {subgoal_index} out of range (plan has {} steps)",
                plan.steps.len()
            );
        };
        let failed = Arc::clone(&step.subgoal);
        let key = failed.retry_key().to_string();
        self.observe(current_state);
        let used = plan.retries.get(&key).copied().unwrap_or(0);

        if used >= self.retry_budget {
            warn!(
                subgoal = %failed.id,
                retry_key = %key,
                retries = used,
                "retry budget exhausted"
            );
            mark_terminal(&mut plan, subgoal_index, &key);
            return Ok(AdaptOutcome::Exhausted(plan));
        }

        plan.retries.insert(key.clone(), used + 1);
        plan.revision += 1;
        let ordinal = plan.adaptation_history.len() + 1;
        let inserted = match request.strategy {
            Strategy::DismissAndRetry => {
                let dismiss = dismiss_subgoal(&failed, &key, ordinal, &self.belief, current_state);
                let id = dismiss.id.clone();
                plan.steps[subgoal_index].progress.status = SubgoalStatus::FailedRetryable;
                plan.steps.insert(subgoal_index, PlanStep::new(dismiss));
                Some(id)
            }
            Strategy::NavigateCorrection => {
                let nav = correction_subgoal(plan.domain, &failed, &key, ordinal, &self.belief);
                let id = nav.id.clone();
                requeue_from_start(&mut plan, subgoal_index);
                plan.steps.insert(subgoal_index, PlanStep::new(nav));
                Some(id)
            }
            Strategy::RetryAction => {
                plan.steps[subgoal_index].progress.status = SubgoalStatus::FailedRetryable;
                None
            }
        };
        debug!(revision = plan.revision, ?inserted, "plan adapted");
        plan.adaptation_history.push(AdaptationRecord {
            revision: plan.revision,
            subgoal_index,
            subgoal_id: failed.id.clone(),
            strategy: request.strategy,
            trigger: request.trigger,
            inserted,
        });
        Ok(AdaptOutcome::Adapted(plan))
    }
}

fn requeue_from_start(plan: &mut Plan, index: usize) {
    let progress = &mut plan.steps[index].progress;
    progress.status = SubgoalStatus::FailedRetryable;
    progress.next_action = 0;
}

/// Mark the failed step, and the step its retries were charged to, terminal.
fn mark_terminal(plan: &mut Plan, index: usize, key: &str) {
    plan.steps[index].progress.status = SubgoalStatus::FailedTerminal;
    if let Some(origin) = plan.position_of(key)
        && plan.steps[origin].progress.status != SubgoalStatus::Passed
    {
        plan.steps[origin].progress.status = SubgoalStatus::FailedTerminal;
    }
}

fn modal_is(modal: &str) -> Predicate {
    Predicate::ModalIs {
        modal: modal.to_string(),
    }
}

/// Entry condition chaining: the first subgoal starts from the initial modal,
/// each later one from its predecessor's target.
fn chain_entries(mut subgoals: Vec<Subgoal>, start: &str) -> Vec<Subgoal> {
    let mut previous_target = start.to_string();
    for subgoal in &mut subgoals {
        subgoal.modal_context = previous_target.clone();
        subgoal.entry_conditions.insert(0, modal_is(&previous_target));
        previous_target = subgoal.target_modal.clone();
    }
    subgoals
}

fn navigate_subgoal(domain: Domain, start: &str) -> Option<Subgoal> {
    let hops = route(domain);
    let destination = hops.last()?.to;
    let actions = route_actions(hops, start, destination).unwrap_or_else(|| {
        hops.iter()
            .map(|hop| RequiredAction::new(ActionKind::Navigate, hop.label))
            .collect()
    });
    Some(Subgoal {
        id: format!("navigate-{destination}"),
        description: format!("Navigate to {destination}"),
        modal_context: start.to_string(),
        target_modal: destination.to_string(),
        required_actions: actions,
        success_criteria: vec![modal_is(destination)],
        entry_conditions: Vec::new(),
        blocking_modals: blocking_modals(domain),
        origin: None,
    })
}

fn unique_id(existing: &[Subgoal], base: String) -> String {
    if !existing.iter().any(|subgoal| subgoal.id == base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !existing.iter().any(|subgoal| subgoal.id == candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Leave the template's destination screen and come back to re-check
/// `criteria`.
fn persistence_subgoal(
    domain: Domain,
    id: String,
    description: String,
    criteria: Vec<Predicate>,
) -> Subgoal {
    match route(domain).last() {
        Some(last) => revisit_subgoal(domain, last.to, last.label, id, description, criteria),
        None => revisit_subgoal(domain, ANY_MODAL, "", id, description, criteria),
    }
}

/// `back` off `screen`, reopen it through `reopen`, then verify. An empty
/// `reopen` verifies in place.
fn revisit_subgoal(
    domain: Domain,
    screen: &str,
    reopen: &str,
    id: String,
    description: String,
    criteria: Vec<Predicate>,
) -> Subgoal {
    let actions = if reopen.is_empty() {
        vec![RequiredAction::new(ActionKind::Verify, "")]
    } else {
        vec![
            RequiredAction::new(ActionKind::Back, ""),
            RequiredAction::new(ActionKind::Navigate, reopen),
            RequiredAction::new(ActionKind::Verify, ""),
        ]
    };
    Subgoal {
        id,
        description,
        modal_context: screen.to_string(),
        target_modal: screen.to_string(),
        required_actions: actions,
        success_criteria: criteria,
        entry_conditions: Vec::new(),
        blocking_modals: blocking_modals(domain),
        origin: None,
    }
}

fn toggle_plan(domain: Domain, goal: &Goal, start: &str, initial: &UiState) -> Vec<Subgoal> {
    let Some(label) = toggle_label(domain) else {
        return vec![fallback_subgoal(goal, start)];
    };
    let Some(navigate) = navigate_subgoal(domain, start) else {
        return vec![fallback_subgoal(goal, start)];
    };
    let screen = navigate.target_modal.clone();
    let current = initial
        .elements
        .iter()
        .find(|element| canonical_label(&element.label) == canonical_label(label))
        .and_then(|element| element.value.as_ref());
    let sequence = toggle_sequence(&goal.text, current);
    let setting = domain.as_str().replace('_', "-");

    let mut subgoals = vec![navigate];
    for value in &sequence {
        let id = unique_id(&subgoals, format!("toggle-{setting}-{value}"));
        subgoals.push(Subgoal {
            id,
            description: format!("Turn {label} {value}"),
            modal_context: screen.clone(),
            target_modal: screen.clone(),
            required_actions: vec![
                RequiredAction::new(ActionKind::Toggle, label).with_value(value.clone()),
            ],
            success_criteria: vec![
                Predicate::ElementValue {
                    label: label.to_string(),
                    value: value.clone(),
                },
                Predicate::NoDialog,
            ],
            entry_conditions: Vec::new(),
            blocking_modals: blocking_modals(domain),
            origin: None,
        });
    }
    if let Some(last) = sequence.last() {
        let id = unique_id(&subgoals, format!("verify-{setting}-persists"));
        subgoals.push(persistence_subgoal(
            domain,
            id,
            format!("Confirm {label} stays {last} after leaving the screen"),
            vec![Predicate::ElementValue {
                label: label.to_string(),
                value: last.clone(),
            }],
        ));
    }
    chain_entries(subgoals, start)
}

fn alarm_plan(goal: &Goal, start: &str) -> Vec<Subgoal> {
    let Some(navigate) = navigate_subgoal(Domain::Alarm, start) else {
        return vec![fallback_subgoal(goal, start)];
    };
    let screen = navigate.target_modal.clone();
    let time = alarm_time(&goal.text);
    let create = Subgoal {
        id: "create-alarm".to_string(),
        description: format!("Create an alarm for {time}"),
        modal_context: screen.clone(),
        target_modal: screen.clone(),
        required_actions: vec![
            RequiredAction::new(ActionKind::Tap, "Add alarm"),
            RequiredAction::new(ActionKind::Type, "Time")
                .with_value(ElementValue::Text(time.clone())),
            RequiredAction::new(ActionKind::Tap, "Save"),
        ],
        success_criteria: vec![
            modal_is(&screen),
            Predicate::ElementPresent {
                label: time.clone(),
            },
        ],
        entry_conditions: Vec::new(),
        blocking_modals: blocking_modals(Domain::Alarm),
        origin: None,
    };
    let enable = Subgoal {
        id: "enable-alarm".to_string(),
        description: format!("Switch the {time} alarm on"),
        modal_context: screen.clone(),
        target_modal: screen,
        required_actions: vec![
            RequiredAction::new(ActionKind::Toggle, time.clone()).with_value(ElementValue::On),
        ],
        success_criteria: vec![Predicate::ElementValue {
            label: time.clone(),
            value: ElementValue::On,
        }],
        entry_conditions: Vec::new(),
        blocking_modals: blocking_modals(Domain::Alarm),
        origin: None,
    };
    let persists = persistence_subgoal(
        Domain::Alarm,
        "verify-alarm-persists".to_string(),
        format!("Confirm the {time} alarm is still on"),
        vec![Predicate::ElementValue {
            label: time,
            value: ElementValue::On,
        }],
    );
    chain_entries(vec![navigate, create, enable, persists], start)
}

fn email_plan(goal: &Goal, start: &str) -> Vec<Subgoal> {
    let Some(navigate) = navigate_subgoal(Domain::EmailSearch, start) else {
        return vec![fallback_subgoal(goal, start)];
    };
    let screen = navigate.target_modal.clone();
    let query = search_query(&goal.text);
    let open_search = Subgoal {
        id: "open-search".to_string(),
        description: "Open mail search".to_string(),
        modal_context: screen,
        target_modal: "email_search".to_string(),
        required_actions: vec![RequiredAction::new(ActionKind::Tap, "Search mail")],
        success_criteria: vec![modal_is("email_search")],
        entry_conditions: Vec::new(),
        blocking_modals: blocking_modals(Domain::EmailSearch),
        origin: None,
    };
    let submit = Subgoal {
        id: "submit-search".to_string(),
        description: format!("Search mail for {query:?}"),
        modal_context: "email_search".to_string(),
        target_modal: "email_results".to_string(),
        required_actions: vec![
            RequiredAction::new(ActionKind::Type, "Search in mail")
                .with_value(ElementValue::Text(query)),
            RequiredAction::new(ActionKind::Tap, "Search"),
        ],
        success_criteria: results_shown(),
        entry_conditions: Vec::new(),
        blocking_modals: blocking_modals(Domain::EmailSearch),
        origin: None,
    };
    let persists = revisit_subgoal(
        Domain::EmailSearch,
        "email_results",
        "Search",
        "verify-search-persists".to_string(),
        "Confirm the results come back after leaving them".to_string(),
        results_shown(),
    );
    chain_entries(vec![navigate, open_search, submit, persists], start)
}

fn results_shown() -> Vec<Predicate> {
    vec![
        modal_is("email_results"),
        Predicate::ElementPresent {
            label: "Search results".to_string(),
        },
    ]
}

/// Single unguarded tap on the goal's most likely target.
fn fallback_subgoal(goal: &Goal, start: &str) -> Subgoal {
    let target = fallback_target(&goal.text);
    Subgoal {
        id: "best-effort".to_string(),
        description: format!("Best-effort attempt: {}", goal.text),
        modal_context: start.to_string(),
        target_modal: ANY_MODAL.to_string(),
        required_actions: vec![RequiredAction::new(ActionKind::Tap, target)],
        success_criteria: Vec::new(),
        entry_conditions: Vec::new(),
        blocking_modals: blocking_modals(Domain::Fallback),
        origin: None,
    }
}

fn dismiss_subgoal(
    failed: &Subgoal,
    key: &str,
    ordinal: usize,
    belief: &ModalBelief,
    state: &UiState,
) -> Subgoal {
    let label = dismiss_label(state);
    let description = match belief.blocking.first() {
        Some(dialog) => format!("Dismiss {dialog:?} blocking {}", failed.id),
        None => format!("Dismiss the dialog blocking {}", failed.id),
    };
    Subgoal {
        id: format!("{}-dismiss-{ordinal}", failed.id),
        description,
        modal_context: belief.current().to_string(),
        target_modal: ANY_MODAL.to_string(),
        required_actions: vec![RequiredAction::new(ActionKind::Dismiss, label)],
        success_criteria: vec![Predicate::NoDialog],
        entry_conditions: Vec::new(),
        blocking_modals: Default::default(),
        origin: Some(key.to_string()),
    }
}

fn correction_subgoal(
    domain: Domain,
    failed: &Subgoal,
    key: &str,
    ordinal: usize,
    belief: &ModalBelief,
) -> Subgoal {
    let from = belief.current().to_string();
    let to = failed.modal_context.clone();
    let actions = route_actions(route(domain), &from, &to)
        .unwrap_or_else(|| vec![RequiredAction::new(ActionKind::Back, "")]);
    Subgoal {
        id: format!("{}-nav-{ordinal}", failed.id),
        description: format!("Return from {from} to {to}"),
        modal_context: from,
        target_modal: to.clone(),
        required_actions: actions,
        success_criteria: vec![modal_is(&to)],
        entry_conditions: Vec::new(),
        blocking_modals: failed.blocking_modals.clone(),
        origin: Some(key.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::predicate::holds;
    use crate::core::types::{BugKind, GoalHints};
    use crate::test_support::{button, dialog, icon, state, switch, wifi_home_state};

    fn goal(text: &str) -> Goal {
        Goal::parse(text, GoalHints::default()).expect("goal")
    }

    fn request(strategy: Strategy, index: usize, trigger: BugKind) -> ReplanningRequest {
        ReplanningRequest {
            strategy,
            subgoal_index: index,
            trigger,
        }
    }

    #[test]
    fn wifi_goal_decomposes_into_navigate_toggles_and_persistence() {
        let plan =
            Planner::default().generate_plan(&goal("turn WiFi off then on"), &wifi_home_state());
        assert!(plan.steps.len() >= 3);
        assert_eq!(plan.domain, Domain::Wifi);
        assert_eq!(plan.confidence, PlanConfidence::Normal);
        assert_eq!(
            plan.subgoal_ids(),
            vec![
                "navigate-wifi_settings",
                "toggle-wifi-off",
                "toggle-wifi-on",
                "verify-wifi-persists"
            ]
        );
        let toggle_off = &plan.steps[1].subgoal;
        assert_eq!(
            toggle_off.required_actions[0].value,
            Some(ElementValue::Off)
        );
    }

    #[test]
    fn entry_conditions_chain_from_initial_state() {
        let initial = wifi_home_state();
        let plan = Planner::default().generate_plan(&goal("turn WiFi off then on"), &initial);
        let first = &plan.steps[0].subgoal;
        assert!(first.entry_conditions.iter().all(|p| holds(p, &initial)));
        for pair in plan.steps.windows(2) {
            let expected = modal_is(&pair[0].subgoal.target_modal);
            assert_eq!(pair[1].subgoal.entry_conditions[0], expected);
        }
    }

    #[test]
    fn unknown_goal_falls_back_with_low_confidence() {
        let initial = state("home_screen", vec![icon("camera", "Camera")]);
        let plan = Planner::default().generate_plan(&goal("open the Camera app"), &initial);
        assert_eq!(plan.confidence, PlanConfidence::Low);
        assert_eq!(plan.steps.len(), 1);
        let subgoal = &plan.steps[0].subgoal;
        assert_eq!(subgoal.required_actions[0].target, "Camera");
        assert!(subgoal.blocking_modals.is_empty());
    }

    #[test]
    fn alarm_and_email_plans_chain_entries() {
        let home = state("home_screen", Vec::new());
        let alarm = Planner::default().generate_plan(&goal("set an alarm for 6:30 am"), &home);
        assert_eq!(
            alarm.subgoal_ids(),
            vec![
                "navigate-alarms_tab",
                "create-alarm",
                "enable-alarm",
                "verify-alarm-persists"
            ]
        );
        let email = Planner::default().generate_plan(&goal("search email for invoices"), &home);
        assert_eq!(
            email.subgoal_ids(),
            vec![
                "navigate-email_app",
                "open-search",
                "submit-search",
                "verify-search-persists"
            ]
        );
        assert_eq!(
            email.steps[2].subgoal.entry_conditions[0],
            modal_is("email_search")
        );
        let persists = &email.steps[3].subgoal;
        assert_eq!(persists.entry_conditions[0], modal_is("email_results"));
        assert_eq!(persists.success_criteria, email.steps[2].subgoal.success_criteria);
        let kinds: Vec<ActionKind> = persists.required_actions.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActionKind::Back, ActionKind::Navigate, ActionKind::Verify]
        );
    }

    #[test]
    fn every_template_ends_with_a_persistence_check() {
        let home = state("home_screen", Vec::new());
        for text in [
            "turn WiFi off then on",
            "toggle bluetooth",
            "enable airplane mode",
            "set an alarm for 6:30 am",
            "search email for invoices",
        ] {
            let plan = Planner::default().generate_plan(&goal(text), &home);
            let last = plan.subgoal_ids().last().map(|id| id.to_string());
            assert!(
                last.as_deref().is_some_and(|id| id.starts_with("verify-")),
                "{text}: {last:?}"
            );
        }
    }

    #[test]
    fn prepositional_on_does_not_add_a_toggle() {
        let plan = Planner::default()
            .generate_plan(&goal("turn off wifi on the phone"), &wifi_home_state());
        assert_eq!(
            plan.subgoal_ids(),
            vec![
                "navigate-wifi_settings",
                "toggle-wifi-off",
                "verify-wifi-persists"
            ]
        );
    }

    #[test]
    fn belief_tracks_observed_states() {
        let mut planner = Planner::default();
        planner.generate_plan(&goal("turn WiFi off then on"), &wifi_home_state());
        assert_eq!(planner.belief().current(), "home_screen");
        planner.observe(&state("settings_app", Vec::new()));
        planner.observe(&state("settings_app", Vec::new()));
        planner.observe(&state("network_settings", Vec::new()));
        assert_eq!(planner.belief().current(), "network_settings");
        assert_eq!(planner.belief().transitions, 2);
    }

    #[test]
    fn dismiss_and_retry_inserts_one_dismiss_before_failed_subgoal() {
        let mut planner = Planner::default();
        let plan = planner.generate_plan(&goal("turn WiFi off then on"), &wifi_home_state());
        let plan = planner.begin(plan, 1);
        let before = plan.clone();
        let blocked = state(
            "wifi_settings",
            vec![
                switch("wifi", "Wi-Fi", ElementValue::On),
                dialog("error_dialog", "Unable to turn off Wi-Fi"),
                button("ok", "OK"),
            ],
        );
        let outcome = planner
            .adapt(
                plan,
                1,
                request(Strategy::DismissAndRetry, 1, BugKind::BlockingDialog),
                &blocked,
            )
            .expect("adapt");
        let AdaptOutcome::Adapted(plan) = outcome else {
            panic!("expected adaptation");
        };
        assert_eq!(plan.adaptation_history.len(), 1);
        assert_eq!(plan.steps.len(), before.steps.len() + 1);
        let dismiss = &plan.steps[1].subgoal;
        assert_eq!(dismiss.id, "toggle-wifi-off-dismiss-1");
        assert_eq!(dismiss.required_actions[0].kind, ActionKind::Dismiss);
        assert_eq!(dismiss.required_actions[0].target, "OK");
        assert_eq!(dismiss.origin.as_deref(), Some("toggle-wifi-off"));
        assert_eq!(dismiss.modal_context, "wifi_settings");
        assert!(dismiss.description.contains("Unable to turn off Wi-Fi"));
        assert_eq!(plan.steps[2].subgoal.id, "toggle-wifi-off");
        assert_eq!(
            plan.steps[2].progress.status,
            SubgoalStatus::FailedRetryable
        );
        let dismiss_count = plan
            .steps
            .iter()
            .filter(|step| step.subgoal.id.contains("-dismiss-"))
            .count();
        assert_eq!(dismiss_count, 1);
        // Untouched subgoals are shared with the previous revision.
        assert!(Arc::ptr_eq(
            &before.steps[0].subgoal,
            &plan.steps[0].subgoal
        ));
        assert_eq!(before.adaptation_history.len(), 0);
    }

    #[test]
    fn navigate_correction_routes_back_to_context_and_resets_cursor() {
        let mut planner = Planner::default();
        let plan = planner.generate_plan(&goal("turn WiFi off then on"), &wifi_home_state());
        let plan = planner.advance_action(planner.begin(plan, 1), 1);
        let lost = state("settings_app", Vec::new());
        let plan = planner
            .adapt(
                plan,
                1,
                request(
                    Strategy::NavigateCorrection,
                    1,
                    BugKind::MissingExpectedScreen,
                ),
                &lost,
            )
            .expect("adapt")
            .into_plan();
        let nav = &plan.steps[1].subgoal;
        assert_eq!(nav.id, "toggle-wifi-off-nav-1");
        assert_eq!(nav.modal_context, "settings_app");
        let labels: Vec<&str> = nav
            .required_actions
            .iter()
            .map(|a| a.target.as_str())
            .collect();
        assert_eq!(labels, vec!["Network & internet", "Wi-Fi"]);
        assert_eq!(plan.steps[2].progress.next_action, 0);
    }

    #[test]
    fn corrections_start_from_the_believed_modal() {
        let mut planner = Planner::default();
        let plan = planner.generate_plan(&goal("turn WiFi off then on"), &wifi_home_state());
        let plan = planner.begin(plan, 1);
        // The device reports no modal; the belief infers it from the labels.
        let unlabelled = state(
            "unknown",
            vec![
                button("net", "Network & internet"),
                switch("plane", "Airplane mode", ElementValue::Off),
            ],
        );
        let plan = planner
            .adapt(
                plan,
                1,
                request(
                    Strategy::NavigateCorrection,
                    1,
                    BugKind::MissingExpectedScreen,
                ),
                &unlabelled,
            )
            .expect("adapt")
            .into_plan();
        assert_eq!(planner.belief().current(), "network_settings");
        let nav = &plan.steps[1].subgoal;
        assert_eq!(nav.modal_context, "network_settings");
        assert_eq!(nav.required_actions[0].target, "Wi-Fi");
        assert_eq!(nav.required_actions.len(), 1);
    }

    #[test]
    fn retry_budget_exhaustion_marks_terminal_without_new_history() {
        let mut planner = Planner::new(2);
        let mut plan = planner.generate_plan(&goal("turn WiFi off then on"), &wifi_home_state());
        plan = planner.complete(plan, 0);
        plan = planner.begin(plan, 1);
        let ui = wifi_home_state();
        for expected_len in 1..=2 {
            plan = planner
                .adapt(
                    plan,
                    1,
                    request(Strategy::RetryAction, 1, BugKind::ToggleStateMismatch),
                    &ui,
                )
                .expect("adapt")
                .into_plan();
            assert_eq!(plan.adaptation_history.len(), expected_len);
        }
        let outcome = planner
            .adapt(
                plan,
                1,
                request(Strategy::RetryAction, 1, BugKind::ToggleStateMismatch),
                &ui,
            )
            .expect("adapt");
        assert!(matches!(outcome, AdaptOutcome::Exhausted(_)));
        let plan = outcome.into_plan();
        assert_eq!(plan.adaptation_history.len(), 2);
        assert_eq!(
            plan.steps[1].progress.status,
            SubgoalStatus::FailedTerminal
        );
        assert_eq!(plan.active_index(), Some(2));
    }

    #[test]
    fn corrective_subgoals_charge_their_origin() {
        let mut planner = Planner::new(1);
        let plan = planner.generate_plan(&goal("turn WiFi off then on"), &wifi_home_state());
        let blocked = state("wifi_settings", vec![dialog("err", "Error"), button("ok", "OK")]);
        let plan = planner
            .adapt(
                plan,
                1,
                request(Strategy::DismissAndRetry, 1, BugKind::BlockingDialog),
                &blocked,
            )
            .expect("adapt")
            .into_plan();
        let outcome = planner
            .adapt(
                plan,
                1,
                request(Strategy::RetryAction, 1, BugKind::UiFreeze),
                &blocked,
            )
            .expect("adapt");
        let plan = outcome.into_plan();
        assert_eq!(plan.steps[1].progress.status, SubgoalStatus::FailedTerminal);
        assert_eq!(plan.steps[2].progress.status, SubgoalStatus::FailedTerminal);
    }

    #[test]
    fn mismatched_request_index_is_rejected() {
        let mut planner = Planner::default();
        let plan = planner.generate_plan(&goal("turn WiFi off then on"), &wifi_home_state());
        let err = planner
            .adapt(
                plan,
                0,
                request(Strategy::RetryAction, 1, BugKind::UiFreeze),
                &wifi_home_state(),
            )
            .expect_err("mismatch");
        assert!(err.to_string().contains("targets subgoal 1"));
    }
}
