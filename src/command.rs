// src/command.rs
use std::str::FromStr;

use thiserror::Error;

use crate::types::Rgb;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` is missing its `{argument}` argument")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("`{command}`: cannot parse `{token}` as a number")]
    InvalidNumber {
        command: &'static str,
        token: String,
    },
}

/// Parameters of an `addcondition` command. Windows left as `None` use the configured defaults.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ConditionSpec {
    pub name: String,
    pub trial_types: Vec<i32>,
    pub outcomes: Vec<i32>,
    pub visible: bool,
    pub color: Option<Rgb>,
    pub pre_sec: Option<f64>,
    pub post_sec: Option<f64>,
}

// 文本协议解析后的命令
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    TrialStart,
    TrialEnd,
    TrialType(i32),
    TrialOutcome(i32),
    TrialAlign,
    AddCondition(ConditionSpec),
    ClearDesign,
    NewDesign(String),
    Ttl { channel: usize, value: i32 },
    NewElectrode { electrode_id: i32, channels: Vec<usize> },
    RemoveElectrode(i32),
    NewUnit { electrode_id: i32, unit_id: i32, color: Rgb },
    RemoveUnit { electrode_id: i32, unit_id: i32 },
    ClearStats,
}

fn number<T: FromStr>(
    command: &'static str,
    argument: &'static str,
    token: Option<&str>,
) -> Result<T, CommandError> {
    let token = token.ok_or(CommandError::MissingArgument { command, argument })?;
    token.parse().map_err(|_| CommandError::InvalidNumber {
        command,
        token: token.to_owned(),
    })
}

fn color<'a>(command: &'static str, tokens: &mut impl Iterator<Item = &'a str>) -> Result<Rgb, CommandError> {
    let r = number(command, "r", tokens.next())?;
    let g = number(command, "g", tokens.next())?;
    let b = number(command, "b", tokens.next())?;
    Ok(Rgb::new(r, g, b))
}

#[derive(Clone, Copy)]
enum ListMode {
    None,
    TrialTypes,
    Outcomes,
}

// addcondition 的参数尽量解析，无法识别的 token 直接跳过
fn parse_condition<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<ConditionSpec, CommandError> {
    const CMD: &str = "addcondition";
    let mut spec = ConditionSpec {
        visible: true,
        ..ConditionSpec::default()
    };
    let mut mode = ListMode::None;
    while let Some(token) = tokens.next() {
        match token.to_ascii_lowercase().as_str() {
            "name" => {
                spec.name = tokens
                    .next()
                    .ok_or(CommandError::MissingArgument { command: CMD, argument: "name" })?
                    .to_owned();
                mode = ListMode::None;
            }
            "visible" => {
                spec.visible = number::<i32>(CMD, "visible", tokens.next())? > 0;
                mode = ListMode::None;
            }
            "pre" => {
                spec.pre_sec = Some(number(CMD, "pre", tokens.next())?);
                mode = ListMode::None;
            }
            "post" => {
                spec.post_sec = Some(number(CMD, "post", tokens.next())?);
                mode = ListMode::None;
            }
            "color" => {
                spec.color = Some(color(CMD, tokens)?);
                mode = ListMode::None;
            }
            "trialtypes" => mode = ListMode::TrialTypes,
            "outcomes" => mode = ListMode::Outcomes,
            other => match (mode, other.parse::<i32>()) {
                (ListMode::TrialTypes, Ok(v)) => spec.trial_types.push(v),
                (ListMode::Outcomes, Ok(v)) => spec.outcomes.push(v),
                _ => log::debug!("addcondition: skipping token `{token}`"),
            },
        }
    }
    if spec.name.is_empty() {
        return Err(CommandError::MissingArgument { command: CMD, argument: "name" });
    }
    Ok(spec)
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut tokens = text.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty());
        let keyword = tokens.next().ok_or(CommandError::Empty)?.to_ascii_lowercase();
        let command = match keyword.as_str() {
            "trialstart" => Command::TrialStart,
            "trialend" => Command::TrialEnd,
            "trialalign" => Command::TrialAlign,
            "trialtype" => Command::TrialType(number("trialtype", "type", tokens.next())?),
            "trialoutcome" => Command::TrialOutcome(number("trialoutcome", "outcome", tokens.next())?),
            "addcondition" => Command::AddCondition(parse_condition(&mut tokens)?),
            "cleardesign" => Command::ClearDesign,
            "newdesign" => {
                let name: Vec<&str> = tokens.by_ref().collect();
                if name.is_empty() {
                    return Err(CommandError::MissingArgument { command: "newdesign", argument: "name" });
                }
                Command::NewDesign(name.join(" "))
            }
            "ttl" => Command::Ttl {
                channel: number("ttl", "channel", tokens.next())?,
                value: number("ttl", "value", tokens.next())?,
            },
            "newelectrode" => {
                let electrode_id = number("newelectrode", "id", tokens.next())?;
                let count: usize = number("newelectrode", "channel count", tokens.next())?;
                let channels = (0..count)
                    .map(|_| number("newelectrode", "channel", tokens.next()))
                    .collect::<Result<Vec<usize>, _>>()?;
                Command::NewElectrode { electrode_id, channels }
            }
            "removeelectrode" => Command::RemoveElectrode(number("removeelectrode", "id", tokens.next())?),
            "newunit" => {
                let electrode_id = number("newunit", "electrode", tokens.next())?;
                let unit_id = number("newunit", "unit", tokens.next())?;
                let mut rest = tokens.peekable();
                let color = if rest.peek().is_some() { color("newunit", &mut rest)? } else { Rgb::WHITE };
                Command::NewUnit { electrode_id, unit_id, color }
            }
            "removeunit" => Command::RemoveUnit {
                electrode_id: number("removeunit", "electrode", tokens.next())?,
                unit_id: number("removeunit", "unit", tokens.next())?,
            },
            "clearstats" => Command::ClearStats,
            _ => return Err(CommandError::Unknown(keyword)),
        };
        Ok(command)
    }
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        text.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_lifecycle_commands() {
        assert_eq!(Command::parse("trialstart").unwrap(), Command::TrialStart);
        assert_eq!(Command::parse("  TrialEnd ").unwrap(), Command::TrialEnd);
        assert_eq!(Command::parse("trialtype 3").unwrap(), Command::TrialType(3));
        assert_eq!(Command::parse("trialoutcome   -1").unwrap(), Command::TrialOutcome(-1));
        assert_eq!(Command::parse("TRIALALIGN").unwrap(), Command::TrialAlign);
    }

    #[test]
    fn addcondition_full_form() {
        let cmd = Command::parse("addcondition name Left trialtypes 1 2 3 outcomes 1 visible 0 pre 0.2 post 1.5 color 255 0 10").unwrap();
        let Command::AddCondition(spec) = cmd else {
            panic!("expected AddCondition");
        };
        assert_eq!(spec.name, "Left");
        assert_eq!(spec.trial_types, vec![1, 2, 3]);
        assert_eq!(spec.outcomes, vec![1]);
        assert!(!spec.visible);
        assert_eq!(spec.pre_sec, Some(0.2));
        assert_eq!(spec.post_sec, Some(1.5));
        assert_eq!(spec.color, Some(Rgb::new(255, 0, 10)));
    }

    #[test]
    fn addcondition_skips_garbage_tokens() {
        let cmd = Command::parse("addcondition name X trialtypes 1 foo 2 visible 1").unwrap();
        let Command::AddCondition(spec) = cmd else {
            panic!("expected AddCondition");
        };
        assert_eq!(spec.trial_types, vec![1, 2]);
        assert!(spec.visible);
        assert!(spec.outcomes.is_empty());
        assert_eq!(spec.pre_sec, None);
    }

    #[test]
    fn addcondition_requires_a_name() {
        assert_eq!(
            Command::parse("addcondition trialtypes 1"),
            Err(CommandError::MissingArgument { command: "addcondition", argument: "name" })
        );
    }

    #[test]
    fn topology_commands() {
        assert_eq!(
            Command::parse("newelectrode 4 2 7 8").unwrap(),
            Command::NewElectrode { electrode_id: 4, channels: vec![7, 8] }
        );
        assert_eq!(
            Command::parse("newunit 4 1").unwrap(),
            Command::NewUnit { electrode_id: 4, unit_id: 1, color: Rgb::WHITE }
        );
        assert_eq!(
            Command::parse("newunit 4 2 10 20 30").unwrap(),
            Command::NewUnit { electrode_id: 4, unit_id: 2, color: Rgb::new(10, 20, 30) }
        );
        assert_eq!(Command::parse("removeunit 4 2").unwrap(), Command::RemoveUnit { electrode_id: 4, unit_id: 2 });
        assert_eq!(Command::parse("removeelectrode 4").unwrap(), Command::RemoveElectrode(4));
    }

    #[test]
    fn design_and_ttl_commands() {
        assert_eq!(Command::parse("newdesign my task").unwrap(), Command::NewDesign("my task".into()));
        assert_eq!(Command::parse("cleardesign").unwrap(), Command::ClearDesign);
        assert_eq!(Command::parse("clearstats").unwrap(), Command::ClearStats);
        assert_eq!(Command::parse("ttl 2 1").unwrap(), Command::Ttl { channel: 2, value: 1 });
    }

    #[test]
    fn malformed_commands_are_errors() {
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
        assert!(matches!(Command::parse("launch rockets"), Err(CommandError::Unknown(_))));
        assert!(matches!(Command::parse("trialtype abc"), Err(CommandError::InvalidNumber { .. })));
        assert!(matches!(Command::parse("ttl 1"), Err(CommandError::MissingArgument { .. })));
        assert!(matches!(Command::parse("newelectrode 1 3 0 1"), Err(CommandError::MissingArgument { .. })));
    }
}
