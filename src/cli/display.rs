//! Display utilities for the session timer CLI.
//!
//! This module provides formatted output for:
//! - Command results
//! - Error messages
//! - Status display
//! - Live updates while watching

use crate::cli::view::{SessionView, ViewUpdate};
use crate::types::{EngineState, TransitionReason};

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows a success message for session start.
    pub fn show_start_success(state: &EngineState) {
        println!("* セッションを開始しました");
        if let Some(id) = &state.session_id {
            println!("  ID: {}", id);
        }
        println!("  残り時間: {}", Self::format_clock(state.remaining_sec));
    }

    /// Shows a success message for session stop.
    pub fn show_stop_success(_state: &EngineState) {
        println!("[] セッションを停止しました");
    }

    /// Shows the current session state.
    pub fn show_status(state: &EngineState) {
        println!("セッション ステータス");
        println!("─────────────────────────────");
        println!("状態: {}", Self::status_label(state));

        if state.is_running() {
            println!("残り時間: {}", Self::format_clock(state.remaining_sec));
            println!(
                "予定時間: {}",
                Self::format_clock(state.planned_duration_sec)
            );
            if let Some(id) = &state.session_id {
                println!("ID: {}", id);
            }
        } else {
            println!(
                "既定の時間: {}",
                Self::format_clock(state.planned_duration_sec)
            );
        }
    }

    /// Shows one line for a change seen while watching.
    pub fn show_update(view: &SessionView, update: ViewUpdate) {
        if let Some(line) = Self::update_line(view, update) {
            println!("{}", line);
        }
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    fn update_line(view: &SessionView, update: ViewUpdate) -> Option<String> {
        let remaining = Self::format_clock(view.state().remaining_sec);
        match update {
            ViewUpdate::Transition(TransitionReason::Started) => {
                Some(format!("* 開始 ({})", remaining))
            }
            ViewUpdate::Transition(TransitionReason::Stopped) => Some("[] 停止".to_string()),
            ViewUpdate::Transition(TransitionReason::Expired) => {
                Some("! 時間になりました".to_string())
            }
            ViewUpdate::Tick(_) => Some(format!("  残り {}", remaining)),
            ViewUpdate::Ignored => None,
        }
    }

    fn status_label(state: &EngineState) -> &'static str {
        if state.is_running() {
            "実行中"
        } else {
            "待機中"
        }
    }

    /// Formats seconds as `MM:SS`. Minutes are not wrapped into hours.
    pub fn format_clock(total_seconds: u64) -> String {
        format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
    }
}

// ============================================================================
// Tests
// ============================================================================
