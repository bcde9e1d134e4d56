//! Keyboard actions for a running supervisor.

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Handle to one running swap's output visibility.
#[derive(Clone)]
pub struct SwapOutput {
    pub path: String,
    pub visible: Arc<AtomicBool>,
}

struct SwitchState {
    outputs: Vec<SwapOutput>,
    /// Index of the swap whose output is shown; `None` means all hidden.
    current: Option<usize>,
}

/// Rotates which running swap prints its output to the console.
///
/// The supervision loop replaces the handle list whenever the running set
/// changes; the key listener only flips visibility flags through it. At
/// most one swap is ever visible.
pub struct OutputSwitch {
    state: Mutex<SwitchState>,
}

impl OutputSwitch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SwitchState {
                outputs: Vec::new(),
                current: None,
            }),
        }
    }

    /// Replace the set of running swaps. Resets the cycle position and
    /// hides all output.
    pub fn replace(&self, outputs: Vec<SwapOutput>) {
        let mut state = self.state.lock().unwrap();

        // Hide the outgoing handles too; a swap that failed to stop keeps
        // its flag, and a restarted swap reuses it.
        for output in state.outputs.iter().chain(outputs.iter()) {
            output.visible.store(false, Ordering::Relaxed);
        }

        state.outputs = outputs;
        state.current = None;
    }

    /// Show the next swap's output, wrapping back to all-hidden after the
    /// last one.
    pub fn cycle(&self) {
        let mut state = self.state.lock().unwrap();

        if state.outputs.is_empty() {
            info!("action: no running swaps; ignoring");
            return;
        }

        // Hide everything first so at most one output is visible.
        for output in &state.outputs {
            output.visible.store(false, Ordering::Relaxed);
        }

        let next = match state.current {
            None => 0,
            Some(i) => i + 1,
        };

        if next >= state.outputs.len() {
            info!("action: hiding all swap output");
            state.current = None;
            return;
        }

        info!("action: showing output for {}", state.outputs[next].path);
        state.outputs[next].visible.store(true, Ordering::Relaxed);
        state.current = Some(next);
    }
}

impl Default for OutputSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// A key press mapped to a handler.
pub struct Action {
    pub key: char,
    pub description: &'static str,
    handler: Box<dyn Fn() + Send>,
}

impl Action {
    pub fn new(key: char, description: &'static str, handler: impl Fn() + Send + 'static) -> Self {
        Self {
            key,
            description,
            handler: Box::new(handler),
        }
    }

    pub fn run(&self) {
        (self.handler)()
    }
}

/// The action table wired up for a supervisor loop.
pub fn default_actions(switch: Arc<OutputSwitch>) -> Vec<Action> {
    vec![Action::new(
        's',
        "switch console output of swap processes",
        move || switch.cycle(),
    )]
}

/// Log the keys the listener responds to.
pub fn print_action_descriptions(actions: &[Action]) {
    for action in actions {
        info!("action: press '{}' to {}", action.key, action.description);
    }
}

/// Listen for key presses in the background, forever.
pub fn spawn_listener(actions: Vec<Action>) {
    thread::spawn(move || listen(actions));
}

fn listen(actions: Vec<Action>) {
    loop {
        let key = match read_key() {
            Ok(key) => key,
            Err(e) => {
                warn!("error getting key input: {e}");
                // Back off so a terminal that is gone for good does not
                // spin the listener.
                thread::sleep(Duration::from_secs(1));
                continue;
            }
        };

        // Raw mode swallows SIGINT, so the interrupt key is on us.
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            info!("interrupted");
            std::process::exit(130);
        }

        if let KeyCode::Char(c) = key.code {
            if let Some(action) = actions.iter().find(|a| a.key == c) {
                action.run();
            }
        }
    }
}

/// Wait for a single key press, restoring the terminal before returning.
fn read_key() -> Result<KeyEvent> {
    terminal::enable_raw_mode()?;

    let result = loop {
        match event::read() {
            Ok(Event::Key(key)) => break Ok(key),
            Ok(_) => continue,
            Err(e) => break Err(e.into()),
        }
    };

    terminal::disable_raw_mode()?;

    result
}
