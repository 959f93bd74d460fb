//! Domain templates: goal classification, navigation routes and goal text
//! parsing used by the Planner.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ActionKind, Domain, ElementValue, Goal, RequiredAction};

/// One navigation edge: tapping `label` on `from` leads to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub from: &'static str,
    pub label: &'static str,
    pub to: &'static str,
}

const fn hop(from: &'static str, label: &'static str, to: &'static str) -> Hop {
    Hop { from, label, to }
}

const WIFI_ROUTE: &[Hop] = &[
    hop("home_screen", "Settings", "settings_app"),
    hop("settings_app", "Network & internet", "network_settings"),
    hop("network_settings", "Wi-Fi", "wifi_settings"),
];
const AIRPLANE_ROUTE: &[Hop] = &[
    hop("home_screen", "Settings", "settings_app"),
    hop("settings_app", "Network & internet", "network_settings"),
];
const BLUETOOTH_ROUTE: &[Hop] = &[
    hop("home_screen", "Settings", "settings_app"),
    hop("settings_app", "Connected devices", "connected_devices"),
];
const ALARM_ROUTE: &[Hop] = &[
    hop("home_screen", "Clock", "clock_app"),
    hop("clock_app", "Alarms", "alarms_tab"),
];
const EMAIL_ROUTE: &[Hop] = &[hop("home_screen", "Gmail", "email_app")];

const COMMON_BLOCKING: &[&str] = &[
    "crash_dialog",
    "error_dialog",
    "permission_dialog",
    "loading_overlay",
];

pub fn route(domain: Domain) -> &'static [Hop] {
    match domain {
        Domain::Wifi => WIFI_ROUTE,
        Domain::AirplaneMode => AIRPLANE_ROUTE,
        Domain::Bluetooth => BLUETOOTH_ROUTE,
        Domain::Alarm => ALARM_ROUTE,
        Domain::EmailSearch => EMAIL_ROUTE,
        Domain::Fallback => &[],
    }
}

/// Switch label a settings-toggle domain operates on.
pub fn toggle_label(domain: Domain) -> Option<&'static str> {
    match domain {
        Domain::Wifi => Some("Wi-Fi"),
        Domain::Bluetooth => Some("Bluetooth"),
        Domain::AirplaneMode => Some("Airplane mode"),
        Domain::Alarm | Domain::EmailSearch | Domain::Fallback => None,
    }
}

/// Modals that block a domain's subgoals. Fallback plans carry no guards.
pub fn blocking_modals(domain: Domain) -> BTreeSet<String> {
    let extra: &[&str] = match domain {
        Domain::Wifi | Domain::Bluetooth | Domain::AirplaneMode => &["airplane_mode_dialog"],
        Domain::Alarm => &["dnd_warning"],
        Domain::EmailSearch => &["network_error_dialog"],
        Domain::Fallback => return BTreeSet::new(),
    };
    COMMON_BLOCKING
        .iter()
        .chain(extra)
        .map(|modal| (*modal).to_string())
        .collect()
}

/// Screens along a route in visiting order.
fn route_screens(route: &[Hop]) -> Vec<&'static str> {
    let mut screens = Vec::with_capacity(route.len() + 1);
    if let Some(first) = route.first() {
        screens.push(first.from);
    }
    screens.extend(route.iter().map(|hop| hop.to));
    screens
}

/// Actions moving from `from` to `to` along `route`.
///
/// Forward moves tap hop labels, backward moves issue `back`, and `from == to`
/// yields a single `verify`. Returns `None` when either screen is off-route.
pub fn route_actions(route: &[Hop], from: &str, to: &str) -> Option<Vec<RequiredAction>> {
    if from == to {
        return Some(vec![RequiredAction::new(ActionKind::Verify, "")]);
    }
    let screens = route_screens(route);
    let start = screens.iter().position(|screen| *screen == from)?;
    let end = screens.iter().position(|screen| *screen == to)?;
    if start < end {
        Some(
            route[start..end]
                .iter()
                .map(|hop| RequiredAction::new(ActionKind::Navigate, hop.label))
                .collect(),
        )
    } else {
        Some(
            (end..start)
                .map(|_| RequiredAction::new(ActionKind::Back, ""))
                .collect(),
        )
    }
}

static WIFI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bwi-?fi\b").expect("wifi regex"));
static BLUETOOTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bbluetooth\b").expect("bluetooth regex"));
static AIRPLANE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(airplane|aeroplane|flight)\s+mode\b").expect("airplane regex")
});
static ALARM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(alarm|clock)s?\b").expect("alarm regex"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(e-?mail|gmail|inbox|mail)s?\b").expect("email regex")
});
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9'-]+").expect("word regex"));
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b").expect("time regex")
});
static QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\bsearch\s+(?:(?:my\s+)?(?:e-?mail|gmail|inbox|mails?)\s+)?(?:for\s+)?(?:"([^"]+)"|'([^']+)'|(.+))"#,
    )
    .expect("query regex")
});
static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:open|tap|launch|press|select|click)\s+(?:the\s+)?(.+?)(?:\s+(?:app|button|icon))?(?:\s+(?:and|then)\b.*)?$",
    )
    .expect("target regex")
});

fn domain_from_hint(hint: &str) -> Option<Domain> {
    match hint.trim().to_lowercase().as_str() {
        "wifi" | "wi-fi" => Some(Domain::Wifi),
        "bluetooth" => Some(Domain::Bluetooth),
        "airplane_mode" | "airplane" => Some(Domain::AirplaneMode),
        "alarm" | "clock" => Some(Domain::Alarm),
        "email" | "email_search" | "gmail" => Some(Domain::EmailSearch),
        "fallback" => Some(Domain::Fallback),
        _ => None,
    }
}

/// Classify a goal into a domain. Recognized hints take precedence.
pub fn classify(goal: &Goal) -> Domain {
    if let Some(domain) = goal.hints.domain.as_deref().and_then(domain_from_hint) {
        return domain;
    }
    let text = goal.text.as_str();
    if AIRPLANE_RE.is_match(text) {
        Domain::AirplaneMode
    } else if WIFI_RE.is_match(text) {
        Domain::Wifi
    } else if BLUETOOTH_RE.is_match(text) {
        Domain::Bluetooth
    } else if ALARM_RE.is_match(text) {
        Domain::Alarm
    } else if EMAIL_RE.is_match(text) && text.to_lowercase().contains("search") {
        Domain::EmailSearch
    } else {
        Domain::Fallback
    }
}

/// Words after which `on`/`off` always names a switch position (`turn on the`).
const POSITION_LEADS: &[&str] = &["turn", "switch", "toggle", "set", "then", "and", "back", "it"];
/// Words that turn a following `on`/`off` into a preposition (`on the phone`).
const DETERMINERS: &[&str] = &[
    "the", "a", "an", "my", "your", "this", "that", "its", "our", "their",
];

/// Requested switch positions in the order the goal names them.
///
/// `enable`/`disable` always count. `on`/`off` count unless they open a noun
/// phrase without a verb before them, so the preposition in
/// `turn off wifi on the phone` is not read as a second request. A goal that
/// names no position (`toggle wifi`) flips the current value and restores it.
/// An unknown current value is treated as on.
pub fn toggle_sequence(text: &str, current: Option<&ElementValue>) -> Vec<ElementValue> {
    let words: Vec<String> = WORD_RE
        .find_iter(text)
        .map(|word| word.as_str().to_lowercase())
        .collect();
    let requested: Vec<ElementValue> = (0..words.len())
        .filter_map(|index| switch_position(&words, index))
        .collect();
    if !requested.is_empty() {
        return requested;
    }
    let current = current.cloned().unwrap_or(ElementValue::On);
    let flipped = current.flipped().unwrap_or(ElementValue::Off);
    vec![flipped, current]
}

fn switch_position(words: &[String], index: usize) -> Option<ElementValue> {
    let value = match words[index].as_str() {
        "enable" | "enabled" => return Some(ElementValue::On),
        "disable" | "disabled" => return Some(ElementValue::Off),
        "on" => ElementValue::On,
        "off" => ElementValue::Off,
        _ => return None,
    };
    let led = index
        .checked_sub(1)
        .is_some_and(|previous| POSITION_LEADS.contains(&words[previous].as_str()));
    let prepositional = words
        .get(index + 1)
        .is_some_and(|next| DETERMINERS.contains(&next.as_str()));
    (led || !prepositional).then_some(value)
}

/// Alarm time named in the goal, normalized to `H:MM AM`.
pub fn alarm_time(text: &str) -> String {
    TIME_RE.captures(text).map_or_else(
        || "7:00 AM".to_string(),
        |caps| {
            let minutes = caps.get(2).map_or("00", |m| m.as_str());
            format!("{}:{minutes} {}", &caps[1], caps[3].to_uppercase())
        },
    )
}

pub fn search_query(text: &str) -> String {
    QUERY_RE
        .captures(text)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| {
            m.as_str()
                .trim()
                .trim_end_matches(|c: char| c.is_ascii_punctuation())
                .to_string()
        })
        .filter(|query| !query.is_empty())
        .unwrap_or_else(|| "test".to_string())
}

/// Best-effort tap target for goals no template covers.
pub fn fallback_target(text: &str) -> String {
    TARGET_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| text.trim().to_string(), |m| m.as_str().trim().to_string())
}
