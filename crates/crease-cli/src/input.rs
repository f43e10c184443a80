// Scorer input parsing.
//
// Translates one line typed at the prompt into a `ScorerCommand` for the
// session. Nothing here touches session state; validation beyond syntax
// (phase, pending prompts, crease membership) happens in the session.

use crease_app::messages::ScorerCommand;
use crease_app::scoring::delivery::{ExtraKind, WicketType};
use crease_core::protocol::TossDecision;

pub const HELP: &str = "\
commands:
  0..6                 runs off the bat
  wd N | nb N          wide / no-ball plus N runs (penalty added by the server)
  b N | lb N           byes / leg byes
  w [wd|nb|b|lb]       start recording a wicket
  type <kind>          bowled, caught, lbw, stumped, hit wicket, run out
  catcher <id>         fielder who took the catch
  victim <id>          batter run out
  fielder <id> <runs>  fielder effecting the run out, runs completed
  back | cancel        step back / abandon the wicket
  batsman <id>         send in the next batter
  bowler <id>          choose the bowler for the next over
  bowlers | batters    list eligible bowlers / waiting batters
  toss <team-id> <bat|bowl>
  start2               start the second innings
  undo                 remove the last ball
  resync               reload the match from the server
  q                    quit";

/// One parsed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(ScorerCommand),
    Help,
    Empty,
}

/// Parse a line of scorer input. The error is a message for the scorer.
pub fn parse_line(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Input::Empty);
    };
    let rest: Vec<&str> = words.collect();
    let head = head.to_ascii_lowercase();

    let cmd = match head.as_str() {
        "help" | "?" => return Ok(Input::Help),
        "q" | "quit" => ScorerCommand::Quit,
        "wd" | "nb" | "b" | "lb" => {
            let extra = extra_kind(&head).ok_or_else(|| format!("unknown extra `{head}`"))?;
            let runs = match rest.as_slice() {
                [] => 0,
                [n] => parse_runs(n)?,
                _ => return Err(format!("usage: {head} N")),
            };
            ScorerCommand::Score {
                runs,
                extra: Some(extra),
            }
        }
        "w" | "wicket" => {
            let extra = match rest.as_slice() {
                [] => None,
                [kind] => Some(extra_kind(kind).ok_or_else(|| format!("unknown extra `{kind}`"))?),
                _ => return Err("usage: w [wd|nb|b|lb]".into()),
            };
            ScorerCommand::BeginWicket { extra }
        }
        "type" => {
            let kind = rest.join(" ");
            let wicket_type = WicketType::from_label(&kind).ok_or_else(|| {
                let known: Vec<&str> = WicketType::ALL.iter().map(|t| t.label()).collect();
                format!("unknown wicket type `{kind}` (one of: {})", known.join(", "))
            })?;
            ScorerCommand::WicketType(wicket_type)
        }
        "catcher" => ScorerCommand::Catcher(one_id(&head, &rest)?),
        "victim" => ScorerCommand::RunOutVictim(one_id(&head, &rest)?),
        "fielder" => match rest.as_slice() {
            [id, runs] => ScorerCommand::RunOutFielder {
                fielder_id: id.to_string(),
                runs: parse_runs(runs)?,
            },
            _ => return Err("usage: fielder <id> <runs>".into()),
        },
        "back" => ScorerCommand::DismissalBack,
        "cancel" => ScorerCommand::DismissalCancel,
        "batsman" | "batter" => ScorerCommand::SelectBatsman(one_id(&head, &rest)?),
        "bowler" => ScorerCommand::SelectBowler(one_id(&head, &rest)?),
        "bowlers" => ScorerCommand::ListBowlers,
        "batters" => ScorerCommand::ListBatters,
        "toss" => match rest.as_slice() {
            [team, decision] => ScorerCommand::Toss {
                winner_team_id: team.to_string(),
                decision: match decision.to_ascii_lowercase().as_str() {
                    "bat" => TossDecision::Bat,
                    "bowl" => TossDecision::Bowl,
                    other => return Err(format!("toss decision must be bat or bowl, not `{other}`")),
                },
            },
            _ => return Err("usage: toss <team-id> <bat|bowl>".into()),
        },
        "start2" => ScorerCommand::StartSecondInnings,
        "undo" => ScorerCommand::UndoLastBall,
        "resync" => ScorerCommand::Resync,
        runs if runs.chars().all(|c| c.is_ascii_digit()) => {
            if !rest.is_empty() {
                return Err(format!("unexpected `{}` after runs", rest.join(" ")));
            }
            ScorerCommand::Score {
                runs: parse_runs(runs)?,
                extra: None,
            }
        }
        other => return Err(format!("unknown command `{other}` (type help)")),
    };
    Ok(Input::Command(cmd))
}

fn extra_kind(s: &str) -> Option<ExtraKind> {
    match s.to_ascii_lowercase().as_str() {
        "wd" => Some(ExtraKind::Wide),
        "nb" => Some(ExtraKind::NoBall),
        "b" => Some(ExtraKind::Bye),
        "lb" => Some(ExtraKind::LegBye),
        _ => None,
    }
}

fn parse_runs(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(n) if n <= 6 => Ok(n),
        _ => Err(format!("runs must be 0 to 6, not `{s}`")),
    }
}

fn one_id(command: &str, rest: &[&str]) -> Result<String, String> {
    match rest {
        [id] => Ok(id.to_string()),
        _ => Err(format!("usage: {command} <id>")),
    }
}
