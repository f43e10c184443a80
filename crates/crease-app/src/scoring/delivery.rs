// Single-delivery accounting: legality, over-log tokens, and who gets
// credited with what.

use std::fmt;

use crease_core::protocol::BallDto;
pub use crease_core::protocol::{ExtraKind, WicketType};

pub const BALLS_PER_OVER: u32 = 6;

/// What happened on one delivery, as far as the scorecard is concerned.
///
/// `runs` is the total credited to the batting team, so a wide that the
/// batters ran one on is `runs = 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallOutcome {
    pub runs: u32,
    pub extra: Option<ExtraKind>,
    pub wicket: bool,
}

impl BallOutcome {
    pub fn from_ball(ball: &BallDto) -> Self {
        Self {
            runs: ball.runs,
            extra: ball.extra,
            wicket: ball.wicket,
        }
    }

    /// Counts toward the six-ball over.
    pub fn is_legal(&self) -> bool {
        self.extra.map_or(true, ExtraKind::is_legal)
    }

    /// Runs credited to the striker's own score.
    pub fn batter_runs(&self) -> u32 {
        match self.extra {
            None => self.runs,
            Some(ExtraKind::NoBall) => self.runs.saturating_sub(1),
            Some(_) => 0,
        }
    }

    /// Whether the striker is charged a ball faced.
    pub fn faces_ball(&self) -> bool {
        self.extra != Some(ExtraKind::Wide)
    }

    /// Runs charged against the bowler.
    pub fn bowler_conceded(&self) -> u32 {
        match self.extra {
            Some(ExtraKind::Bye) | Some(ExtraKind::LegBye) => 0,
            _ => self.runs,
        }
    }

    pub fn is_four(&self) -> bool {
        self.off_the_bat() && self.batter_runs() == 4
    }

    pub fn is_six(&self) -> bool {
        self.off_the_bat() && self.batter_runs() == 6
    }

    fn off_the_bat(&self) -> bool {
        matches!(self.extra, None | Some(ExtraKind::NoBall))
    }

    /// Over-log token: `0`, `4`, `Wd`, `3Wd`, `Nb`, `2B`, `1Lb`, `W`, `1W`,
    /// `NbW`.
    pub fn token(&self) -> String {
        let mut token = match self.extra {
            None if self.wicket && self.runs == 0 => String::new(),
            None => self.runs.to_string(),
            Some(ExtraKind::Wide) => penalty_token(self.runs, "Wd"),
            Some(ExtraKind::NoBall) => penalty_token(self.runs, "Nb"),
            Some(ExtraKind::Bye) => format!("{}B", self.runs),
            Some(ExtraKind::LegBye) => format!("{}Lb", self.runs),
        };
        if self.wicket {
            token.push('W');
        }
        token
    }

}

fn penalty_token(runs: u32, suffix: &str) -> String {
    if runs <= 1 {
        suffix.to_string()
    } else {
        format!("{runs}{suffix}")
    }
}

/// Legality of a raw over-log token without fully parsing it.
pub fn is_legal_token(token: &str) -> bool {
    !(token.contains("Wd") || token.contains("Nb"))
}

/// Overs in cricket notation: `completed.balls`, where `balls` is 0..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Overs {
    pub completed: u32,
    pub balls: u32,
}

impl Overs {
    pub fn from_legal_balls(legal: u32) -> Self {
        Self {
            completed: legal / BALLS_PER_OVER,
            balls: legal % BALLS_PER_OVER,
        }
    }
}

impl fmt::Display for Overs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.completed, self.balls)
    }
}

/// Scorecard text for a dismissal, e.g. `c Smith b Jones`.
pub fn dismissal_text(wicket_type: WicketType, bowler: &str, fielder: Option<&str>) -> String {
    match wicket_type {
        WicketType::Bowled => format!("b {bowler}"),
        WicketType::Caught => match fielder {
            Some(f) if f == bowler => format!("c & b {bowler}"),
            Some(f) => format!("c {f} b {bowler}"),
            None => format!("c ? b {bowler}"),
        },
        WicketType::Lbw => format!("lbw b {bowler}"),
        WicketType::Stumped => match fielder {
            Some(f) => format!("st {f} b {bowler}"),
            None => format!("st b {bowler}"),
        },
        WicketType::HitWicket => format!("hit wicket b {bowler}"),
        WicketType::RunOut => match fielder {
            Some(f) => format!("run out ({f})"),
            None => "run out".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball(runs: u32, extra: Option<ExtraKind>, wicket: bool) -> BallOutcome {
        BallOutcome {
            runs,
            extra,
            wicket,
        }
    }

    #[test]
    fn tokens_for_common_deliveries() {
        assert_eq!(ball(0, None, false).token(), "0");
        assert_eq!(ball(4, None, false).token(), "4");
        assert_eq!(ball(1, Some(ExtraKind::Wide), false).token(), "Wd");
        assert_eq!(ball(3, Some(ExtraKind::Wide), false).token(), "3Wd");
        assert_eq!(ball(1, Some(ExtraKind::NoBall), false).token(), "Nb");
        assert_eq!(ball(2, Some(ExtraKind::Bye), false).token(), "2B");
        assert_eq!(ball(1, Some(ExtraKind::LegBye), false).token(), "1Lb");
        assert_eq!(ball(0, None, true).token(), "W");
        assert_eq!(ball(1, None, true).token(), "1W");
        assert_eq!(ball(1, Some(ExtraKind::NoBall), true).token(), "NbW");
    }

    #[test]
    fn legality() {
        assert!(ball(0, None, false).is_legal());
        assert!(ball(2, Some(ExtraKind::Bye), false).is_legal());
        assert!(!ball(1, Some(ExtraKind::Wide), false).is_legal());
        assert!(!ball(1, Some(ExtraKind::NoBall), true).is_legal());
        assert!(is_legal_token("1Lb"));
        assert!(is_legal_token("W"));
        assert!(!is_legal_token("2Wd"));
        assert!(!is_legal_token("NbW"));
    }

    #[test]
    fn credit_rules() {
        let no_ball_four = ball(5, Some(ExtraKind::NoBall), false);
        assert_eq!(no_ball_four.batter_runs(), 4);
        assert!(no_ball_four.is_four());
        assert!(no_ball_four.faces_ball());
        assert_eq!(no_ball_four.bowler_conceded(), 5);

        let wide = ball(2, Some(ExtraKind::Wide), false);
        assert_eq!(wide.batter_runs(), 0);
        assert!(!wide.faces_ball());
        assert_eq!(wide.bowler_conceded(), 2);

        let byes = ball(4, Some(ExtraKind::Bye), false);
        assert_eq!(byes.batter_runs(), 0);
        assert!(!byes.is_four());
        assert!(byes.faces_ball());
        assert_eq!(byes.bowler_conceded(), 0);

        assert!(ball(6, None, false).is_six());
    }

    #[test]
    fn overs_notation() {
        assert_eq!(Overs::from_legal_balls(119).to_string(), "19.5");
        assert_eq!(Overs::from_legal_balls(120).to_string(), "20.0");
        assert_eq!(Overs::from_legal_balls(0), Overs::default());
    }

    #[test]
    fn dismissal_texts() {
        assert_eq!(
            dismissal_text(WicketType::Caught, "Jones", Some("Smith")),
            "c Smith b Jones"
        );
        assert_eq!(
            dismissal_text(WicketType::Caught, "Jones", Some("Jones")),
            "c & b Jones"
        );
        assert_eq!(dismissal_text(WicketType::Lbw, "Jones", None), "lbw b Jones");
        assert_eq!(
            dismissal_text(WicketType::RunOut, "Jones", Some("Patel")),
            "run out (Patel)"
        );
        assert_eq!(dismissal_text(WicketType::Bowled, "Jones", None), "b Jones");
    }
}
