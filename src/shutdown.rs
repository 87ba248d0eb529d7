//! Interrupt handling for SIGINT and SIGTERM.

use tokio::signal;
use tracing::{error, info, warn};

use crate::engine::BackupTarget;

/// Which signal interrupted the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    CtrlC,
    Terminate,
}

impl Interrupt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interrupt::CtrlC => "SIGINT (Ctrl+C)",
            Interrupt::Terminate => "SIGTERM",
        }
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// A handler that cannot be installed never fires; the run then simply completes.
pub async fn wait_for_signal() -> Interrupt {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => Interrupt::CtrlC,
        _ = terminate => Interrupt::Terminate,
    }
}

/// Best-effort cleanup after an interrupted run.
///
/// Nothing is rolled back: the mirror may be partial and a git command may still be
/// finishing under its own timeout. The next run starts from whatever is on disk.
pub fn cleanup(interrupt: Interrupt, target: &BackupTarget) {
    warn!("Received {}, abandoning backup run", interrupt.as_str());
    info!(
        "{} may hold a partial mirror; the next run will reconcile it",
        target.backup_path.display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_names() {
        assert_eq!(Interrupt::CtrlC.as_str(), "SIGINT (Ctrl+C)");
        assert_eq!(Interrupt::Terminate.as_str(), "SIGTERM");
    }
}
