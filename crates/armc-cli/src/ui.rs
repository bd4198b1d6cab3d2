use armc::engine::progress::{Progress, ProgressCallback};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::warn;

#[derive(Debug)]
pub enum UiEvent {
    Progress(Progress),
    Log(String),
}

/// Owns the terminal while a run is in progress: renders progress events and prints log lines
/// above the active bar.
pub struct UiManager {
    mp: Arc<MultiProgress>,
    state: BarState,
    event_receiver: mpsc::Receiver<UiEvent>,
    shutdown_receiver: watch::Receiver<bool>,
    _sentinel_bar: ProgressBar,
}

/// The bar of the current phase and the label it was started with.
#[derive(Default)]
struct BarState {
    active_bar: Option<ProgressBar>,
    base_message: String,
}

impl BarState {
    fn replace(&mut self, bar: ProgressBar, label: &str) {
        self.clear();
        bar.set_message(label.to_string());
        self.active_bar = Some(bar);
        self.base_message = label.to_string();
    }

    /// Removes the bar and returns the label of the phase it belonged to.
    fn clear(&mut self) -> String {
        if let Some(bar) = self.active_bar.take() {
            bar.finish_and_clear();
        }
        std::mem::take(&mut self.base_message)
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Some(bar) = &self.active_bar {
            f(bar);
        }
    }
}

impl UiManager {
    pub fn new() -> (Self, mpsc::Sender<UiEvent>, watch::Sender<bool>) {
        let (event_sender, event_receiver) = mpsc::channel(1024);
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mp = Arc::new(MultiProgress::new());
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        let _sentinel_bar = mp.add(ProgressBar::hidden());
        let manager = Self {
            mp,
            state: BarState::default(),
            event_receiver,
            shutdown_receiver,
            _sentinel_bar,
        };

        (manager, event_sender, shutdown_sender)
    }

    /// Renders events until shutdown is signalled, then drains whatever is still queued.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.event_receiver.recv() => self.handle_event(event),
                result = self.shutdown_receiver.changed() => {
                    if result.is_err() || *self.shutdown_receiver.borrow() {
                        break;
                    }
                }
            }
        }
        while let Ok(event) = self.event_receiver.try_recv() {
            self.handle_event(event);
        }
        self.state.clear();
        self._sentinel_bar.finish_and_clear();
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Log(msg) => self.print(msg),
            UiEvent::Progress(progress) => self.handle_progress(progress),
        }
    }

    fn print(&self, line: String) {
        self.mp.println(line).ok();
    }

    fn handle_progress(&mut self, progress: Progress) {
        match progress {
            Progress::PhaseStart { name } => {
                let spinner = self.mp.add(ProgressBar::new_spinner());
                spinner.enable_steady_tick(Duration::from_millis(80));
                spinner.set_style(Self::spinner_style());
                self.state.replace(spinner, name);
            }
            Progress::PhaseFinish => {
                let label = self.state.clear();
                self.print(format!("✓ {}", label));
            }
            Progress::TaskStart { total_steps } => self.state.with_bar(|bar| {
                bar.disable_steady_tick();
                bar.set_style(Self::bar_style());
                bar.set_length(total_steps);
                bar.set_position(0);
            }),
            Progress::TaskIncrement => self.state.with_bar(|bar| bar.inc(1)),
            Progress::TaskFinish => self.state.with_bar(|bar| bar.finish()),
            Progress::StatusUpdate { text } => {
                let label = format!("{} ({})", self.state.base_message, text);
                self.state.with_bar(|bar| bar.set_message(label));
            }
            Progress::SuperIteration {
                index,
                total,
                acceptance_rate,
                phi,
            } => self.print(format!(
                "  super-iteration {:>4}/{}: acceptance {:>5.1}%, phi -> {:.4e}",
                index + 1,
                total,
                acceptance_rate * 100.0,
                phi
            )),
            Progress::Message(msg) => self.print(format!("  {}", msg)),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<50} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .with_key(
                "eta",
                |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                },
            )
            .progress_chars("━╸ ")
    }
}

/// Forwards core progress events to the UI manager's channel.
#[derive(Clone)]
pub struct CliProgressHandler {
    sender: mpsc::Sender<UiEvent>,
}

impl CliProgressHandler {
    pub fn new(sender: mpsc::Sender<UiEvent>) -> Self {
        Self { sender }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let sender = self.sender.clone();
        Box::new(move |progress: Progress| {
            if let Err(e) = sender.try_send(UiEvent::Progress(progress)) {
                warn!("Failed to send progress update to UI channel: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_manager() -> UiManager {
        let (manager, _, _) = UiManager::new();
        manager.mp.set_draw_target(ProgressDrawTarget::hidden());
        manager
    }

    fn start_phase(manager: &mut UiManager, name: &'static str) {
        manager.handle_event(UiEvent::Progress(Progress::PhaseStart { name }));
    }

    #[test]
    fn handle_phase_start_creates_new_spinner() {
        let mut manager = setup_manager();
        assert!(manager.state.active_bar.is_none());

        start_phase(&mut manager, "Monte Carlo");

        let bar = manager.state.active_bar.as_ref().unwrap();
        assert_eq!(bar.message(), "Monte Carlo");
        assert_eq!(manager.state.base_message, "Monte Carlo");
    }

    #[test]
    fn handle_phase_start_replaces_existing_bar() {
        let mut manager = setup_manager();
        start_phase(&mut manager, "Initial Evaluation");
        start_phase(&mut manager, "Monte Carlo");

        let bar = manager.state.active_bar.as_ref().unwrap();
        assert_eq!(bar.message(), "Monte Carlo");
    }

    #[test]
    fn handle_phase_finish_clears_active_bar() {
        let mut manager = setup_manager();
        start_phase(&mut manager, "Monte Carlo");
        manager.handle_event(UiEvent::Progress(Progress::PhaseFinish));

        assert!(manager.state.active_bar.is_none());
        assert!(manager.state.base_message.is_empty());
    }

    #[test]
    fn task_events_drive_the_bar() {
        let mut manager = setup_manager();
        start_phase(&mut manager, "Monte Carlo");
        manager.handle_event(UiEvent::Progress(Progress::TaskStart { total_steps: 100 }));
        for _ in 0..10 {
            manager.handle_event(UiEvent::Progress(Progress::TaskIncrement));
        }
        {
            let bar = manager.state.active_bar.as_ref().unwrap();
            assert_eq!(bar.length(), Some(100));
            assert_eq!(bar.position(), 10);
        }

        manager.handle_event(UiEvent::Progress(Progress::TaskFinish));
        assert!(manager.state.active_bar.as_ref().unwrap().is_finished());
    }

    #[test]
    fn handle_status_update_changes_bar_message() {
        let mut manager = setup_manager();
        start_phase(&mut manager, "Monte Carlo");
        manager.handle_event(UiEvent::Progress(Progress::StatusUpdate {
            text: "phi 1.0".into(),
        }));

        let bar = manager.state.active_bar.as_ref().unwrap();
        assert_eq!(bar.message(), "Monte Carlo (phi 1.0)");
    }

    #[test]
    fn super_iteration_and_log_lines_do_not_disturb_the_bar() {
        let mut manager = setup_manager();
        start_phase(&mut manager, "Monte Carlo");
        manager.handle_event(UiEvent::Progress(Progress::SuperIteration {
            index: 0,
            total: 10,
            acceptance_rate: 0.3,
            phi: 2.0,
        }));
        manager.handle_event(UiEvent::Log("a log line".to_string()));
        assert_eq!(
            manager.state.active_bar.as_ref().unwrap().message(),
            "Monte Carlo"
        );
    }

    #[test]
    fn phase_finish_without_a_bar_is_harmless() {
        let mut manager = setup_manager();
        manager.handle_event(UiEvent::Progress(Progress::PhaseFinish));
        manager.handle_event(UiEvent::Progress(Progress::TaskIncrement));
        manager.handle_event(UiEvent::Progress(Progress::Message("resumed".into())));
        assert!(manager.state.active_bar.is_none());
    }

    #[test]
    fn callback_survives_a_full_or_closed_channel() {
        let (sender, receiver) = mpsc::channel(1);
        let callback = CliProgressHandler::new(sender).get_callback();
        callback(Progress::TaskIncrement);
        callback(Progress::TaskIncrement);
        drop(receiver);
        callback(Progress::TaskFinish);
    }

    #[tokio::test]
    async fn cli_progress_handler_sends_progress_event() {
        let (sender, mut receiver) = mpsc::channel(1);
        let handler = CliProgressHandler::new(sender);
        let callback = handler.get_callback();

        callback(Progress::PhaseStart { name: "Testing" });

        match receiver.recv().await {
            Some(UiEvent::Progress(Progress::PhaseStart { name })) => assert_eq!(name, "Testing"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
