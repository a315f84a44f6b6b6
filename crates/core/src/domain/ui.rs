//! Accessibility-tree UI automation and keyboard shortcut workflows
//!
//! The tree client and the keyboard playback device are supplied from
//! outside; this module matches elements, sequences clicks and checks media
//! playback progress on top of them.

use crate::domain::poll::{poll_until, settle, CancelToken, PollConfig, PollError};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum UiError {
    #[error("UI element not found: {0}")]
    NotFound(String),

    #[error("Invalid name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The automation client reported a failure
    #[error("UI automation error: {0}")]
    Automation(String),

    #[error("Playback did not advance ({before:?} -> {after:?})")]
    PlaybackStalled { before: Duration, after: Duration },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<PollError> for UiError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::Timeout(after) => UiError::Timeout(after),
            PollError::Cancelled => UiError::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, UiError>;

/// An accessibility-tree node as seen by the automation client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiElement {
    pub name: String,
    pub role: String,
}

impl UiElement {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }
}

/// How an element name is matched
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Literal(String),
    Pattern(Regex),
}

impl NameMatcher {
    pub fn literal(name: impl Into<String>) -> Self {
        NameMatcher::Literal(name.into())
    }

    /// Parse `name` or `/regex/flags`; the only flag honoured is `i`
    pub fn parse(text: &str) -> Result<Self> {
        if let Some(body) = text.strip_prefix('/') {
            if let Some(end) = body.rfind('/') {
                let (pattern, flags) = (&body[..end], &body[end + 1..]);
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(flags.contains('i'))
                    .build()?;
                return Ok(NameMatcher::Pattern(regex));
            }
        }
        Ok(NameMatcher::Literal(text.to_string()))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Literal(expected) => expected == name,
            NameMatcher::Pattern(regex) => regex.is_match(name),
        }
    }
}

impl fmt::Display for NameMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameMatcher::Literal(name) => write!(f, "{:?}", name),
            NameMatcher::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

/// Name and role of an element to act on
#[derive(Debug, Clone)]
pub struct UiQuery {
    pub name: NameMatcher,
    pub role: String,
}

impl UiQuery {
    pub fn new(name: NameMatcher, role: impl Into<String>) -> Self {
        Self {
            name,
            role: role.into(),
        }
    }

    pub fn button(name: &str) -> Result<Self> {
        Ok(Self::new(NameMatcher::parse(name)?, BUTTON_ROLE))
    }

    pub fn parse(name: &str, role: &str) -> Result<Self> {
        Ok(Self::new(NameMatcher::parse(name)?, role))
    }

    pub fn matches(&self, element: &UiElement) -> bool {
        element.role == self.role && self.name.matches(&element.name)
    }
}

impl fmt::Display for UiQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.role)
    }
}

pub const BUTTON_ROLE: &str = "button";
pub const TOGGLE_BUTTON_ROLE: &str = "toggleButton";
pub const STATUS_TRAY: &str = "/Status tray, /i";

/// Accessibility-tree client
pub trait UiAutomation {
    /// Name and role of every element in the tree
    fn elements(&self) -> Result<Vec<UiElement>>;

    /// Perform the default action (click) on the first matching element
    fn do_default(&self, query: &UiQuery) -> Result<()>;

    /// Wait until an element matching `query` is present
    fn wait_for(&self, query: &UiQuery, poll: PollConfig, cancel: &CancelToken) -> Result<()> {
        let outcome = poll_until(poll, cancel, || {
            let found = self.elements()?.iter().any(|e| query.matches(e));
            Ok::<_, UiError>(found.then_some(()))
        })?;
        outcome.map_err(|e| match e {
            PollError::Timeout(_) => UiError::NotFound(query.to_string()),
            other => other.into(),
        })
    }
}

/// Keyboard shortcuts played back through the emulated keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shortcut {
    Enter,
    CtrlT,
    CtrlW,
    CtrlF5,
    Down,
}

impl Shortcut {
    /// Name of the recorded event file for this shortcut
    pub fn playback_file(&self) -> &'static str {
        match self {
            Shortcut::Enter => "keyboard_enter",
            Shortcut::CtrlT => "keyboard_ctrl+t",
            Shortcut::CtrlW => "keyboard_ctrl+w",
            Shortcut::CtrlF5 => "keyboard_ctrl+f5",
            Shortcut::Down => "keyboard_down",
        }
    }
}

/// Emulated keyboard
pub trait KeyboardPlayback {
    /// Play the shortcut and block until it has been delivered
    fn play(&self, shortcut: Shortcut) -> Result<()>;
}

/// Pacing shared by the click workflows
#[derive(Debug, Clone)]
pub struct UiPacing {
    /// Pause after each click
    pub pause: Duration,
    /// Bound for an element to appear
    pub appear: PollConfig,
    pub cancel: CancelToken,
}

impl UiPacing {
    pub fn new(pause: Duration, appear: PollConfig) -> Self {
        Self {
            pause,
            appear,
            cancel: CancelToken::new(),
        }
    }

    fn settle(&self) -> Result<()> {
        settle(self.pause, &self.cancel).map_err(UiError::from)
    }
}

/// Wait for and click each step in order
pub fn click_sequence<U: UiAutomation + ?Sized>(
    ui: &U,
    steps: &[UiQuery],
    pacing: &UiPacing,
) -> Result<()> {
    for step in steps {
        ui.wait_for(step, pacing.appear, &pacing.cancel)?;
        debug!(element = %step, "Clicking");
        ui.do_default(step)?;
        pacing.settle()?;
    }
    Ok(())
}

pub fn open_status_tray<U: UiAutomation + ?Sized>(ui: &U, pacing: &UiPacing) -> Result<()> {
    info!("Opening status tray");
    click_sequence(ui, &[UiQuery::button(STATUS_TRAY)?], pacing)
}

/// Launch an app from the launcher's full app list
pub fn launch_app<U: UiAutomation + ?Sized>(ui: &U, app: &str, pacing: &UiPacing) -> Result<()> {
    info!(app, "Launching app");
    let steps = [
        UiQuery::new(NameMatcher::literal("Launcher"), BUTTON_ROLE),
        UiQuery::new(NameMatcher::literal("Expand to all apps"), BUTTON_ROLE),
        UiQuery::new(NameMatcher::literal(app), BUTTON_ROLE),
    ];
    click_sequence(ui, &steps, pacing)
}

pub fn minimize_app<U: UiAutomation + ?Sized>(ui: &U, pacing: &UiPacing) -> Result<()> {
    click_sequence(ui, &[UiQuery::new(NameMatcher::literal("Minimize"), BUTTON_ROLE)], pacing)
}

/// Restore an app by clicking its shelf button
pub fn maximize_app<U: UiAutomation + ?Sized>(ui: &U, app: &str, pacing: &UiPacing) -> Result<()> {
    click_sequence(ui, &[UiQuery::new(NameMatcher::literal(app), BUTTON_ROLE)], pacing)
}

pub fn connect_bluetooth_headset<U: UiAutomation + ?Sized>(
    ui: &U,
    headset: &str,
    pacing: &UiPacing,
) -> Result<()> {
    info!(headset, "Connecting Bluetooth headset");
    let steps = [
        UiQuery::button(STATUS_TRAY)?,
        UiQuery::new(
            NameMatcher::literal("Show Bluetooth settings. Bluetooth is on"),
            BUTTON_ROLE,
        ),
        UiQuery::new(NameMatcher::literal(headset), BUTTON_ROLE),
    ];
    click_sequence(ui, &steps, pacing)
}

/// Start a full-screen recording from the status tray, then open a tab
pub fn start_screen_record<U, K>(ui: &U, keyboard: &K, pacing: &UiPacing) -> Result<()>
where
    U: UiAutomation + ?Sized,
    K: KeyboardPlayback + ?Sized,
{
    let steps = [
        UiQuery::button(STATUS_TRAY)?,
        UiQuery::button("/Close/i")?,
        UiQuery::button("/Screen capture/i")?,
        UiQuery::parse("/Screen record/i", TOGGLE_BUTTON_ROLE)?,
        UiQuery::parse("/Record full screen/i", TOGGLE_BUTTON_ROLE)?,
    ];
    click_sequence(ui, &steps, pacing)?;
    keyboard.play(Shortcut::Enter)?;
    keyboard.play(Shortcut::CtrlT)?;
    pacing.settle()?;
    info!("Recording started");
    Ok(())
}

pub fn stop_screen_record<U: UiAutomation + ?Sized>(ui: &U, pacing: &UiPacing) -> Result<()> {
    click_sequence(ui, &[UiQuery::button("/Stop screen recording/i")?], pacing)?;
    info!("Recording stopped");
    Ok(())
}

/// Open the Downloads folder in Files and play `file` with the default player
pub fn play_in_files_app<U, K>(ui: &U, keyboard: &K, file: &str, pacing: &UiPacing) -> Result<()>
where
    U: UiAutomation + ?Sized,
    K: KeyboardPlayback + ?Sized,
{
    launch_app(ui, "Files", pacing)?;
    let steps = [
        UiQuery::new(NameMatcher::literal("Downloads"), "treeItem"),
        UiQuery::new(NameMatcher::literal(file), "inlineTextBox"),
    ];
    click_sequence(ui, &steps, pacing)?;
    keyboard.play(Shortcut::Enter)?;
    pacing.settle()
}

/// Pause then resume the default player
pub fn pause_resume<U: UiAutomation + ?Sized>(ui: &U, pacing: &UiPacing) -> Result<()> {
    let steps = [
        UiQuery::new(NameMatcher::literal("Pause"), BUTTON_ROLE),
        UiQuery::new(NameMatcher::literal("Play"), BUTTON_ROLE),
    ];
    click_sequence(ui, &steps, pacing)
}

/// Click the seek slider `forward` times, then press Down `backward` times
pub fn seek<U, K>(ui: &U, keyboard: &K, forward: usize, backward: usize, pacing: &UiPacing) -> Result<()>
where
    U: UiAutomation + ?Sized,
    K: KeyboardPlayback + ?Sized,
{
    let slider = UiQuery::new(NameMatcher::literal("Seek slider"), "slider");
    for _ in 0..forward {
        ui.do_default(&slider)?;
    }
    pacing.settle()?;
    for _ in 0..backward {
        keyboard.play(Shortcut::Down)?;
    }
    Ok(())
}

pub fn take_screenshot<K: KeyboardPlayback + ?Sized>(keyboard: &K) -> Result<()> {
    keyboard.play(Shortcut::CtrlF5)
}

pub fn close_player<K: KeyboardPlayback + ?Sized>(keyboard: &K) -> Result<()> {
    keyboard.play(Shortcut::CtrlW)
}

/// Position shown by a player's `current / total` label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlaybackPosition {
    pub current: Duration,
    pub total: Duration,
}

fn parse_clock(text: &str) -> Option<Duration> {
    let mut seconds = 0u64;
    for part in text.trim().split(':') {
        seconds = seconds.checked_mul(60)?.checked_add(part.parse::<u64>().ok()?)?;
    }
    Some(Duration::from_secs(seconds))
}

impl PlaybackPosition {
    /// Parse the first `m:ss / m:ss` (or `h:mm:ss`) label in `text`
    pub fn parse(text: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"(\d+(?::\d{2}){1,2})\s*/\s*(\d+(?::\d{2}){1,2})").expect("valid regex")
        });
        let caps = re.captures(text)?;
        Some(Self {
            current: parse_clock(&caps[1])?,
            total: parse_clock(&caps[2])?,
        })
    }
}

/// Position label of the player among the tree elements
pub fn playback_position(elements: &[UiElement]) -> Result<PlaybackPosition> {
    elements
        .iter()
        .find_map(|e| PlaybackPosition::parse(&e.name))
        .ok_or_else(|| UiError::NotFound("playback position label".to_string()))
}

/// Check that the default player's position advances over `probe_delay`
pub fn check_audio_playing<U: UiAutomation + ?Sized>(
    ui: &U,
    probe_delay: Duration,
    cancel: &CancelToken,
) -> Result<PlaybackPosition> {
    let before = playback_position(&ui.elements()?)?;
    settle(probe_delay, cancel)?;
    let after = playback_position(&ui.elements()?)?;

    if after.current > before.current {
        info!(before = ?before.current, after = ?after.current, "Audio file is being played");
        Ok(after)
    } else {
        Err(UiError::PlaybackStalled {
            before: before.current,
            after: after.current,
        })
    }
}

/// Page-hosted media element
pub trait MediaPlayer {
    fn play(&self, file: &str) -> Result<()>;

    /// `currentTime` of the element, in seconds
    fn current_time(&self) -> Result<f64>;
}

/// Start `file` and wait until its position moves past the starting point
pub fn wait_for_playback_progress<P: MediaPlayer + ?Sized>(
    player: &P,
    file: &str,
    poll: PollConfig,
    cancel: &CancelToken,
) -> Result<f64> {
    player.play(file)?;
    let start = player.current_time()?;
    let outcome = poll_until(poll, cancel, || {
        let now = player.current_time()?;
        Ok::<_, UiError>((now > start).then_some(now))
    })?;
    outcome.map_err(|e| match e {
        PollError::Timeout(after) => {
            UiError::Automation(format!("player never started within {:?}", after))
        }
        other => other.into(),
    })
}
