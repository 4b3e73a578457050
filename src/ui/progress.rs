use crate::orchestrator::RunReport;
use crate::ui::progress_message::{ProgressMessage, ProgressPhase};
use crate::ui::theme;
use crate::ui::Icons;
use indicatif::{HumanDuration, MultiProgress, ProgressBar};
use owo_colors::OwoColorize;
use std::thread;
use std::time::Duration;

pub struct ProgressManager {
    mp: MultiProgress,
    extraction: ProgressBar,
    fixup: ProgressBar,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressManager {
    pub fn new() -> (Self, crossbeam::channel::Sender<ProgressMessage>) {
        let (tx, rx) = crossbeam::channel::unbounded::<ProgressMessage>();

        let mp = MultiProgress::new();
        let is_term = console::Term::stdout().is_term();

        let extraction = if is_term {
            mp.add(ProgressBar::new(0).with_message("Extracting references"))
        } else {
            ProgressBar::hidden()
        };

        let fixup = if is_term {
            mp.add(ProgressBar::new_spinner().with_message("Repairing parent links"))
        } else {
            ProgressBar::hidden()
        };

        let extraction_clone = extraction.clone();
        let fixup_clone = fixup.clone();

        let handle = thread::spawn(move || {
            for msg in rx {
                match msg {
                    ProgressMessage::Started {
                        phase: ProgressPhase::Extraction,
                        total,
                    } => {
                        extraction_clone.set_length(total as u64);
                    }
                    ProgressMessage::Progress {
                        phase: ProgressPhase::Extraction,
                        current,
                        item,
                    } => {
                        extraction_clone.set_position(current as u64);
                        if let Some(ref reference) = item {
                            extraction_clone.set_message(format!("Imported: {}", reference));
                        }
                    }
                    ProgressMessage::Started {
                        phase: ProgressPhase::Fixup,
                        total: _,
                    } => {
                        fixup_clone.enable_steady_tick(Duration::from_millis(100));
                    }
                    ProgressMessage::Finished {
                        phase: ProgressPhase::Extraction,
                    } => {
                        extraction_clone.finish_with_message("Done");
                    }
                    ProgressMessage::Finished {
                        phase: ProgressPhase::Fixup,
                    } => {
                        fixup_clone.finish_with_message("Done");
                    }
                    ProgressMessage::Error(e) => {
                        extraction_clone.println(format!("{} {}", Icons::CROSS, e));
                    }
                    ProgressMessage::Exit => break,
                    _ => {}
                }
            }
        });

        (
            Self {
                mp,
                extraction,
                fixup,
                handle: Some(handle),
            },
            tx,
        )
    }

    pub fn clear(&self) {
        self.mp.clear().ok();
    }

    /// Wait for the render thread; every sender must be dropped first
    pub fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
        self.extraction.finish_and_clear();
        self.fixup.finish_and_clear();
        self.clear();
    }

    pub fn finish_with_summary(self, report: &RunReport) {
        self.finish();
        println!();
        let (icon, style) = if report.is_partial() {
            (Icons::WARN, theme().warn.clone())
        } else {
            (Icons::CHECK, theme().success.clone())
        };
        println!(
            "{} {}",
            icon,
            format!("{} complete in {}", report.operation, HumanDuration(report.elapsed)).style(style)
        );
        println!(
            "  {} {}/{} references  {} {} commits  {} {} parents relinked",
            Icons::BRANCH.style(theme().info.clone()),
            report.tasks.succeeded,
            report.tasks.dispatched,
            Icons::COMMIT.style(theme().info.clone()),
            report.commits_inserted(),
            Icons::LINK.style(theme().info.clone()),
            report.fixup.relinked + report.fixup.restored
        );
    }
}

pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        if console::Term::stdout().is_term() {
            pb.enable_steady_tick(Duration::from_millis(100));
        } else {
            pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }
        Self { pb }
    }

    pub fn finish_and_clear(&self) {
        self.pb.finish_and_clear();
    }
}
