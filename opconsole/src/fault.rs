//! Platform failure signatures and their classification.
//!
//! Every wait on a console also looks for a fixed set of signatures that mean
//! the firmware or kernel under test has failed. When one matches, the
//! classifier turns it into a typed [`Fault`], reads a little further to
//! capture the useful part of the failure output, and demotes the shared
//! system state so the next test knows it must recover the machine.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use log::{debug, warn};

use crate::channel::{Console, MatchResult, Pattern, PatternSet, WaitOutcome};
use crate::config::SessionSettings;
use crate::system::{SystemHandle, SystemState};

/// Kind of platform failure recognised on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The simulator could not find or load the kernel image.
    BringUpFailure,
    SoftLockup,
    HardLockup,
    KernelBug,
    KernelPanic,
    KernelOops,
    /// Firmware assertion failure.
    FirmwareAssert,
    FirmwareUnexpectedException,
    /// The firmware asked for a reboot because of a platform error.
    PlatformError,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::BringUpFailure => "Bring-up failure",
            FaultKind::SoftLockup => "Soft lockup",
            FaultKind::HardLockup => "Hard lockup",
            FaultKind::KernelBug => "Kernel bug",
            FaultKind::KernelPanic => "Kernel panic",
            FaultKind::KernelOops => "Kernel OOPS",
            FaultKind::FirmwareAssert => "Firmware assert",
            FaultKind::FirmwareUnexpectedException => "Firmware unexpected exception",
            FaultKind::PlatformError => "Platform error",
        };
        f.write_str(name)
    }
}

/// What to read after a signature matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    None,
    Kernel,
    Firmware,
    Platform,
}

impl FaultKind {
    fn follow_up(self) -> FollowUp {
        match self {
            FaultKind::BringUpFailure => FollowUp::None,
            FaultKind::SoftLockup
            | FaultKind::HardLockup
            | FaultKind::KernelBug
            | FaultKind::KernelPanic
            | FaultKind::KernelOops => FollowUp::Kernel,
            FaultKind::FirmwareAssert | FaultKind::FirmwareUnexpectedException => {
                FollowUp::Firmware
            }
            FaultKind::PlatformError => FollowUp::Platform,
        }
    }
}

/// Baseline failure signatures, in priority-index order.
pub const BASELINE_SIGNATURES: &[(&str, FaultKind)] = &[
    (r"qemu: could (not )?(find|load) kernel", FaultKind::BringUpFailure),
    (r"INFO: rcu_sched self-detected stall on CPU", FaultKind::SoftLockup),
    (r"kernel BUG at", FaultKind::KernelBug),
    (r"Kernel panic", FaultKind::KernelPanic),
    (r"Watchdog .* Hard LOCKUP", FaultKind::HardLockup),
    (r"Oops: Kernel access of bad area", FaultKind::KernelOops),
    (r"\[[0-9. ]+,0\] Assert fail:", FaultKind::FirmwareAssert),
    (r"\[[0-9. ]+,[0-9]\] Unexpected exception", FaultKind::FirmwareUnexpectedException),
    (r"OPAL: Reboot requested due to Platform error\.", FaultKind::PlatformError),
];

/// Markers that end the extra capture after a kernel fault.
const KERNEL_MARKERS: &[&str] = &[
    r"INFO: rcu_sched self-detected stall on CPU",
    r":mon>",
    r"Rebooting in \d+ seconds",
    r"Kernel panic - not syncing: Hard LOCKUP",
];

/// Firmware resumes booting once its diagnostic block is printed.
const FIRMWARE_MARKER: &str = r"boot_entry.*\r?\n";

/// Hostboot error block printed after a platform error, read step by step.
const PLATFORM_STEPS: &[(&str, Duration)] = &[
    ("================================================", Duration::from_secs(120)),
    ("Error reported by", Duration::from_secs(10)),
    ("================================================", Duration::from_secs(60)),
    ("ISTEP", Duration::from_secs(20)),
];

fn compile(patterns: &[&str]) -> PatternSet {
    patterns
        .iter()
        .map(|p| Pattern::new(p).expect("built-in console pattern is a valid regex"))
        .collect::<Vec<_>>()
        .into()
}

static BASELINE: LazyLock<PatternSet> = LazyLock::new(|| {
    let signatures: Vec<&str> = BASELINE_SIGNATURES.iter().map(|(p, _)| *p).collect();
    compile(&signatures)
});

static KERNEL_FOLLOWUP: LazyLock<PatternSet> = LazyLock::new(|| compile(KERNEL_MARKERS));

static FIRMWARE_FOLLOWUP: LazyLock<PatternSet> = LazyLock::new(|| compile(&[FIRMWARE_MARKER]));

/// The compiled baseline signatures.
pub fn baseline() -> &'static PatternSet {
    &BASELINE
}

/// Kind for a baseline pattern index.
pub fn kind_for(index: usize) -> Option<FaultKind> {
    BASELINE_SIGNATURES.get(index).map(|(_, kind)| *kind)
}

/// A classified platform failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// What went wrong.
    pub kind: FaultKind,

    /// System state at the time of the fault, when a system is attached.
    pub state: Option<SystemState>,

    /// Console output around the failure.
    pub log: String,
}

impl Fault {
    pub fn new(kind: FaultKind, state: Option<SystemState>, log: impl Into<String>) -> Self {
        Self {
            kind,
            state,
            log: log.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.unwrap_or_default();
        write!(f, "{} (system in state '{}'): {}", self.kind, state, self.log)
    }
}

impl std::error::Error for Fault {}

/// Turns a baseline match into a [`Fault`], capturing follow-up output.
#[derive(Debug, Clone)]
pub struct FaultClassifier {
    kernel_followup: Duration,
    firmware_followup: Duration,
}

impl Default for FaultClassifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(5))
    }
}

impl FaultClassifier {
    pub fn new(kernel_followup: Duration, firmware_followup: Duration) -> Self {
        Self {
            kernel_followup,
            firmware_followup,
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(settings.kernel_followup, settings.firmware_followup)
    }

    /// Classify the baseline match `matched` (whose index is into
    /// [`baseline`]) and read the follow-up output from `console`.
    ///
    /// Follow-up reads are bounded and never fail the classification; a
    /// timeout or closed stream just ends the capture.
    pub async fn classify(
        &self,
        kind: FaultKind,
        matched: &MatchResult,
        console: &mut Console,
        system: Option<&SystemHandle>,
    ) -> Fault {
        let state = system.map(SystemHandle::mark_unknown);
        warn!(
            "{}: {} detected (system was {})",
            console.target(),
            kind,
            state.unwrap_or_default()
        );

        let mut log = String::new();
        match kind.follow_up() {
            FollowUp::None => log.push_str(&matched.after),
            FollowUp::Kernel => {
                log.push_str(&matched.after);
                capture(console, &KERNEL_FOLLOWUP, self.kernel_followup, &mut log).await;
            }
            FollowUp::Firmware => {
                log.push_str(&matched.after);
                capture(console, &FIRMWARE_FOLLOWUP, self.firmware_followup, &mut log).await;
            }
            FollowUp::Platform => {
                log.push_str(&matched.before);
                log.push_str(&matched.after);
                for (marker, timeout) in PLATFORM_STEPS {
                    let step = PatternSet::from(Pattern::literal(marker));
                    if !capture(console, &step, *timeout, &mut log).await {
                        break;
                    }
                }
            }
        }

        Fault::new(kind, state, log)
    }
}

/// One raw follow-up read; everything read is appended to `log`.
///
/// Returns whether a marker matched.
async fn capture(
    console: &mut Console,
    markers: &PatternSet,
    timeout: Duration,
    log: &mut String,
) -> bool {
    match console.read_until(markers, timeout).await {
        Ok(WaitOutcome::Matched(m)) => {
            log.push_str(&m.before);
            log.push_str(&m.after);
            true
        }
        Ok(WaitOutcome::Timeout { before }) => {
            log.push_str(&before);
            // Already part of the fault log
            console.clear_buffer();
            false
        }
        Ok(WaitOutcome::Eof { before }) => {
            log.push_str(&before);
            false
        }
        Err(e) => {
            debug!("{}: follow-up capture ended: {}", console.target(), e);
            false
        }
    }
}
