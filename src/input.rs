use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use simview::params::Magnitude;
use simview::ControlEvent;
use std::time::Duration;

#[derive(Clone, Debug)]
pub(crate) struct InputEvent {
    pub(crate) key: KeyCode,
    pub(crate) mods: KeyModifiers,
}

/// What a key press asks the application to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum AppAction {
    Control(ControlEvent),
    /// Select the parameter on this panel row (digit keys, `1` is row 0).
    Jump(usize),
    HelpToggle,
    Quit,
}

/// Waits up to `timeout` for the first event, then drains whatever else is
/// already queued. A resize counts as an event so the caller redraws.
pub(crate) fn collect_input(timeout: Duration) -> anyhow::Result<(Vec<InputEvent>, bool)> {
    let mut out = Vec::new();
    let mut resized = false;

    let mut wait = timeout;
    while event::poll(wait)? {
        wait = Duration::ZERO;
        match event::read()? {
            Event::Key(k) => {
                if k.kind == KeyEventKind::Press || k.kind == KeyEventKind::Repeat {
                    out.push(InputEvent {
                        key: k.code,
                        mods: k.modifiers,
                    });
                    if out.len() >= 32 {
                        break;
                    }
                }
            }
            Event::Resize(..) => resized = true,
            _ => {}
        }
    }
    Ok((out, resized))
}

pub(crate) fn map_event_to_action(help_open: bool, ev: InputEvent) -> Option<AppAction> {
    if help_open {
        return match ev.key {
            KeyCode::Esc => Some(AppAction::HelpToggle),
            KeyCode::Char(c) if matches!(c.to_ascii_lowercase(), 'h' | '?') => {
                Some(AppAction::HelpToggle)
            }
            KeyCode::Char(c) if c.eq_ignore_ascii_case(&'q') => Some(AppAction::Quit),
            _ => None,
        };
    }

    let big = if ev.mods.contains(KeyModifiers::SHIFT) {
        Magnitude::Large
    } else {
        Magnitude::Normal
    };

    let event = match ev.key {
        KeyCode::Esc => return Some(AppAction::Quit),
        KeyCode::Left => ControlEvent::PreviousParameter,
        KeyCode::Right => ControlEvent::NextParameter,
        KeyCode::Up => ControlEvent::Increase(big),
        KeyCode::Down => ControlEvent::Decrease(big),
        KeyCode::Char(' ') => ControlEvent::NewPulse,
        KeyCode::Char(c) if c.is_ascii_digit() => {
            let d = c.to_digit(10).unwrap_or(0) as usize;
            return Some(AppAction::Jump((d + 9) % 10));
        }
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'q' => return Some(AppAction::Quit),
            'h' | '?' => return Some(AppAction::HelpToggle),
            'p' => ControlEvent::PreviousParameter,
            'n' => ControlEvent::NextParameter,
            'r' => ControlEvent::ResetAll,
            'i' => ControlEvent::ToggleDisplayMode,
            's' => ControlEvent::ToggleSpectrumShape,
            'o' => ControlEvent::RandomizeOrientation,
            'u' => ControlEvent::UpdateReference,
            'd' => ControlEvent::ToggleDiffuse,
            'c' => ControlEvent::TogglePalette,
            _ => return None,
        },
        _ => return None,
    };
    Some(AppAction::Control(event))
}

/// Key reference shown in the help box and the footer.
pub(crate) const KEY_HELP: &[(&str, &str)] = &[
    ("\u{2190} / p", "previous parameter"),
    ("\u{2192} / n", "next parameter"),
    ("\u{2191} / \u{2193}", "step value (shift: big step)"),
    ("1-9, 0", "jump to parameter row"),
    ("space", "new pulse"),
    ("r", "reset all parameters"),
    ("i", "overlay / current-only"),
    ("s", "spectrum: gaussian, SASE, mono"),
    ("o", "random orientation"),
    ("u", "copy current to reference"),
    ("d", "diffuse scattering on/off"),
    ("c", "colour palette"),
    ("h / ?", "help"),
    ("q / esc", "quit"),
];
