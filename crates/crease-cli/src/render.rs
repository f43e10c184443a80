// Plain-text rendering of session updates, one line each.

use chrono::NaiveTime;

use crease_app::messages::UiUpdate;
use crease_app::scoring::dismissal::DismissalStep;
use crease_app::scoring::projection::PendingAction;
use crease_core::protocol::PlayerRef;

/// Render one update, or `None` if it has nothing to show. Notices carry
/// the time they were raised.
pub fn render(update: &UiUpdate, at: NaiveTime) -> Option<String> {
    let line = match update {
        UiUpdate::Projection(p) => p.summary_line(),
        UiUpdate::Pending(Some(action)) => format!("> {action} ({})", hint(action)),
        UiUpdate::Pending(None) => return None,
        UiUpdate::ChannelStatus { kind, ready } => {
            let state = if *ready { "connected" } else { "disconnected" };
            format!("[{kind} {state}]")
        }
        UiUpdate::ProjectionStale(true) => "score may be out of date; type resync to reload".into(),
        UiUpdate::ProjectionStale(false) => return None,
        UiUpdate::Notice(notice) => format!("{} {notice}", at.format("%H:%M:%S")),
        UiUpdate::SelectableBowlers(players) => format!("bowlers: {}", player_list(players)),
        UiUpdate::AvailableBatters(players) => format!("batters: {}", player_list(players)),
        UiUpdate::NextInningsPrompt => "innings break over; type start2 to begin the second innings".into(),
        UiUpdate::MatchComplete { result } => match result {
            Some(result) => format!("match complete: {result}"),
            None => "match complete".into(),
        },
    };
    Some(line)
}

fn hint(action: &PendingAction) -> &'static str {
    match action {
        PendingAction::AwaitBowlerSelection => "bowlers, then bowler <id>",
        PendingAction::AwaitBatsmanSelection => "batters, then batsman <id>",
        PendingAction::AwaitDismissalDetail(step) => match step {
            DismissalStep::SelectWicketType => "type <kind>",
            DismissalStep::SelectCatcher => "catcher <id>",
            DismissalStep::SelectRunOutVictim => "victim <id>",
            DismissalStep::SelectRunOutFielder => "fielder <id> <runs>",
        },
    }
}

fn player_list(players: &[PlayerRef]) -> String {
    if players.is_empty() {
        return "none".into();
    }
    players
        .iter()
        .map(|p| format!("{} ({})", p.id, p.name))
        .collect::<Vec<_>>()
        .join(", ")
}
