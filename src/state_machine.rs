//! Modem provisioning state machine
//!
//! A pure transition table: given the current state, the input that woke it
//! and what is persisted, it names the next state and the single command to
//! emit. The engine in [`crate::modem`] owns the clock and the serial port.

use crate::config::TICKS_PER_SECOND;
use crate::modem::BaudRate;

const SECOND: u16 = TICKS_PER_SECOND;

/// Cooldown before provisioning restarts after a failure
pub const RESTART_DELAY: u8 = (SECOND * 2) as u8;
/// Cooldown after the modem switched serial speed
pub const BAUD_SWITCH_DELAY: u8 = (SECOND / 4) as u8;
/// Association can take a long time
pub const JOIN_TIMEOUT: u16 = SECOND * 60;
/// Window for the data prompt after a begin-send
pub const SEND_PROMPT_TIMEOUT: u16 = SECOND / 2;
/// Window for any reply to a close request
pub const CLOSE_TIMEOUT: u16 = SECOND;

/// Provisioning and runtime states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemState {
    Ready,
    InitRequired,
    UartTest,
    UartDefaultSet,
    UartDefaultDelay,
    UartWorkSet,
    UartWorkDelay,
    EchoOff,
    CloseAll,
    MultiConnection,
    ServerStop,
    Mode,
    ModeAfterStationError,
    ApDhcp,
    ApAddress,
    ApCredentials,
    StationIp,
    JoinQuery,
    Join,
    Listen,
    Send,
    SendData,
    Disconnect,
}

impl ModemState {
    pub fn is_ready(self) -> bool {
        self == ModemState::Ready
    }

    /// States that belong to a client send or close rather than provisioning
    pub fn is_link_operation(self) -> bool {
        matches!(
            self,
            ModemState::Send | ModemState::SendData | ModemState::Disconnect
        )
    }
}

/// What woke the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// The state's response window elapsed
    Timeout,
    Ok,
    Error,
    Fail,
    Prompt,
    SendOk,
    /// Association query reported the persisted SSID
    ApMatch,
}

impl Input {
    fn is_failure(self) -> bool {
        matches!(self, Input::Timeout | Input::Error | Input::Fail)
    }
}

/// Modem operating mode for `AT+CWMODE_CUR`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Station = 1,
    AccessPoint = 2,
    Both = 3,
}

/// Command lines the engine knows how to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtCommand {
    Probe,
    Reset,
    UartConfig,
    EchoOff,
    CloseAll,
    MultiConnection,
    ServerStop,
    Mode(WifiMode),
    StationDhcp,
    StationAddress,
    ApDhcp,
    ApAddress,
    ApCredentials,
    JoinQuery,
    Join,
    Listen,
    BeginSend,
    /// Raw payload of the job in flight
    Payload,
    Close(u8),
}

/// Result of a client send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Complete,
    Failed,
}

/// Persisted facts that steer provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Profile {
    /// Station SSID is stored, so join a network instead of hosting one
    pub station: bool,
    /// Station IP is stored, so skip DHCP
    pub static_ip: bool,
}

/// One edge of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub next: ModemState,
    pub command: Option<AtCommand>,
    /// Response window in ticks, zero when nothing is awaited
    pub timeout: u16,
    /// Cooldown in ticks before the next state may act
    pub delay: u8,
    pub baud: Option<BaudRate>,
    pub outcome: Option<SendOutcome>,
}

impl Step {
    fn to(next: ModemState) -> Self {
        Self {
            next,
            command: None,
            timeout: 0,
            delay: 0,
            baud: None,
            outcome: None,
        }
    }

    fn send(next: ModemState, command: AtCommand, timeout: u16) -> Self {
        Self {
            command: Some(command),
            timeout,
            ..Self::to(next)
        }
    }

    fn with_baud(self, baud: BaudRate) -> Self {
        Self {
            baud: Some(baud),
            ..self
        }
    }

    fn cooldown(next: ModemState, delay: u8) -> Self {
        Self {
            delay,
            ..Self::to(next)
        }
    }

    fn ready(outcome: Option<SendOutcome>) -> Self {
        Self {
            outcome,
            ..Self::to(ModemState::Ready)
        }
    }

    /// Starts a client send from the ready state
    pub fn begin_send() -> Self {
        Self::send(ModemState::Send, AtCommand::BeginSend, SEND_PROMPT_TIMEOUT)
    }

    /// Closes a link from the ready state
    pub fn close(link: u8) -> Self {
        Self::send(ModemState::Disconnect, AtCommand::Close(link), CLOSE_TIMEOUT)
    }

    /// Restart after a fault
    pub fn restart(delay: u8) -> Self {
        Self::cooldown(ModemState::InitRequired, delay)
    }

    /// Restart forced by a modem that keeps answering `busy`. A modem that
    /// is already being reinitialized is not reset again.
    pub fn busy_reset(from: ModemState) -> Self {
        let step = Self::restart(RESTART_DELAY);
        if from == ModemState::InitRequired {
            step
        } else {
            Self {
                command: Some(AtCommand::Reset),
                ..step
            }
        }
    }
}

/// State transition result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Keep waiting in the current state
    Stay,
    Go(Step),
}

/// Success continues with `step`; failures restart provisioning
fn check_or_restart(input: Input, step: Step) -> Transition {
    match input {
        Input::Ok => Transition::Go(step),
        i if i.is_failure() => Transition::Go(Step::restart(RESTART_DELAY)),
        _ => Transition::Stay,
    }
}

/// Success continues with `step`; failures abandon station mode
fn check_or_host(input: Input, step: Step) -> Transition {
    match input {
        Input::Ok => Transition::Go(step),
        i if i.is_failure() => Transition::Go(Step::send(
            ModemState::ModeAfterStationError,
            AtCommand::Mode(WifiMode::Both),
            SECOND * 5,
        )),
        _ => Transition::Stay,
    }
}

/// Computes the edge taken from `state` on `input`
pub fn transition(state: ModemState, input: Input, profile: &Profile) -> Transition {
    use ModemState::*;

    let listen = Step::send(Listen, AtCommand::Listen, SECOND * 5);
    let ap_dhcp = Step::send(ApDhcp, AtCommand::ApDhcp, SECOND);

    match state {
        Ready => Transition::Stay,
        InitRequired => Transition::Go(
            Step::send(UartTest, AtCommand::Probe, SECOND / 2).with_baud(BaudRate::Working),
        ),
        UartTest => {
            if input == Input::Timeout {
                Transition::Go(
                    Step::send(UartDefaultSet, AtCommand::UartConfig, SECOND / 2)
                        .with_baud(BaudRate::Default),
                )
            } else {
                Transition::Go(Step::send(EchoOff, AtCommand::EchoOff, SECOND / 2))
            }
        }
        UartDefaultSet => Transition::Go(Step::cooldown(UartDefaultDelay, BAUD_SWITCH_DELAY)),
        UartDefaultDelay => Transition::Go(
            Step::send(UartWorkSet, AtCommand::UartConfig, SECOND / 2)
                .with_baud(BaudRate::Working),
        ),
        UartWorkSet => check_or_restart(input, Step::cooldown(UartWorkDelay, BAUD_SWITCH_DELAY)),
        UartWorkDelay => Transition::Go(Step::send(EchoOff, AtCommand::EchoOff, SECOND / 2)),
        EchoOff => check_or_restart(input, Step::send(CloseAll, AtCommand::CloseAll, SECOND)),
        CloseAll => match input {
            Input::Ok | Input::Error => Transition::Go(Step::send(
                MultiConnection,
                AtCommand::MultiConnection,
                SECOND / 2,
            )),
            _ => Transition::Go(Step::restart(RESTART_DELAY)),
        },
        MultiConnection => check_or_restart(
            input,
            Step::send(ServerStop, AtCommand::ServerStop, SECOND * 5),
        ),
        ServerStop => match input {
            Input::Timeout | Input::Ok | Input::Error => {
                let mode = if profile.station {
                    WifiMode::Station
                } else {
                    WifiMode::AccessPoint
                };
                Transition::Go(Step::send(Mode, AtCommand::Mode(mode), SECOND * 5))
            }
            _ => Transition::Stay,
        },
        Mode => {
            let next = if !profile.station {
                ap_dhcp
            } else if profile.static_ip {
                Step::send(StationIp, AtCommand::StationAddress, SECOND)
            } else {
                Step::send(StationIp, AtCommand::StationDhcp, SECOND)
            };
            check_or_restart(input, next)
        }
        ModeAfterStationError => check_or_restart(input, ap_dhcp),
        ApDhcp => check_or_restart(
            input,
            Step::send(ApAddress, AtCommand::ApAddress, SECOND * 5),
        ),
        ApAddress => check_or_restart(
            input,
            Step::send(ApCredentials, AtCommand::ApCredentials, SECOND * 5),
        ),
        ApCredentials => check_or_restart(input, listen),
        StationIp => check_or_host(
            input,
            Step::send(JoinQuery, AtCommand::JoinQuery, SECOND * 5),
        ),
        JoinQuery => {
            if input == Input::ApMatch {
                // already associated; wait for the query's trailing OK
                Transition::Go(Step {
                    timeout: SECOND / 2,
                    ..Step::to(Join)
                })
            } else {
                check_or_host(input, Step::send(Join, AtCommand::Join, JOIN_TIMEOUT))
            }
        }
        Join => check_or_host(input, listen),
        Listen => check_or_restart(input, Step::ready(None)),
        Send => match input {
            Input::Prompt => Transition::Go(Step::send(SendData, AtCommand::Payload, SECOND * 5)),
            // the begin-send is acknowledged with OK before the prompt
            Input::Ok => Transition::Stay,
            _ => Transition::Go(Step::ready(Some(SendOutcome::Failed))),
        },
        SendData => match input {
            Input::SendOk => Transition::Go(Step::ready(Some(SendOutcome::Complete))),
            i if i.is_failure() => Transition::Go(Step::ready(Some(SendOutcome::Failed))),
            _ => Transition::Stay,
        },
        Disconnect => Transition::Go(Step::ready(None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds OK to every command and returns the emitted commands
    fn walk_with_ok(profile: Profile, first: Input) -> std::vec::Vec<AtCommand> {
        let mut state = ModemState::InitRequired;
        let mut commands = std::vec::Vec::new();
        let mut input = first;
        for _ in 0..64 {
            if state.is_ready() {
                return commands;
            }
            match transition(state, input, &profile) {
                Transition::Go(step) => {
                    if let Some(cmd) = step.command {
                        commands.push(cmd);
                    }
                    state = step.next;
                    // cooldowns and command-less steps end with their window
                    input = if step.command.is_some() {
                        Input::Ok
                    } else {
                        Input::Timeout
                    };
                }
                Transition::Stay => panic!("stuck in {:?}", state),
            }
        }
        panic!("never became ready");
    }

    #[test]
    fn access_point_provisioning_reaches_ready() {
        let cmds = walk_with_ok(Profile::default(), Input::Timeout);
        assert_eq!(
            cmds,
            [
                AtCommand::Probe,
                AtCommand::EchoOff,
                AtCommand::CloseAll,
                AtCommand::MultiConnection,
                AtCommand::ServerStop,
                AtCommand::Mode(WifiMode::AccessPoint),
                AtCommand::ApDhcp,
                AtCommand::ApAddress,
                AtCommand::ApCredentials,
                AtCommand::Listen,
            ]
        );
    }

    #[test]
    fn station_provisioning_reaches_ready() {
        let profile = Profile {
            station: true,
            static_ip: true,
        };
        let cmds = walk_with_ok(profile, Input::Timeout);
        assert_eq!(
            cmds,
            [
                AtCommand::Probe,
                AtCommand::EchoOff,
                AtCommand::CloseAll,
                AtCommand::MultiConnection,
                AtCommand::ServerStop,
                AtCommand::Mode(WifiMode::Station),
                AtCommand::StationAddress,
                AtCommand::JoinQuery,
                AtCommand::Join,
                AtCommand::Listen,
            ]
        );
    }

    #[test]
    fn silent_probe_switches_serial_speed() {
        let profile = Profile::default();
        let Transition::Go(probe) = transition(ModemState::InitRequired, Input::Timeout, &profile)
        else {
            panic!("init must probe");
        };
        assert_eq!(probe.baud, Some(BaudRate::Working));

        let Transition::Go(step) = transition(ModemState::UartTest, Input::Timeout, &profile) else {
            panic!("timeout must advance");
        };
        assert_eq!(step.next, ModemState::UartDefaultSet);
        assert_eq!(step.baud, Some(BaudRate::Default));
        assert_eq!(step.command, Some(AtCommand::UartConfig));

        let Transition::Go(step) = transition(step.next, Input::Error, &profile) else {
            panic!("any reply advances");
        };
        assert_eq!(step.delay, BAUD_SWITCH_DELAY);
        assert_eq!(step.command, None);

        let Transition::Go(step) = transition(step.next, Input::Timeout, &profile) else {
            panic!("cooldown advances");
        };
        assert_eq!(step.next, ModemState::UartWorkSet);
        assert_eq!(step.baud, Some(BaudRate::Working));
    }

    #[test]
    fn failures_restart_after_cooldown() {
        let profile = Profile::default();
        for state in [
            ModemState::EchoOff,
            ModemState::MultiConnection,
            ModemState::Mode,
            ModemState::ApDhcp,
            ModemState::ApAddress,
            ModemState::ApCredentials,
            ModemState::Listen,
        ] {
            for input in [Input::Timeout, Input::Error, Input::Fail] {
                assert_eq!(
                    transition(state, input, &profile),
                    Transition::Go(Step::restart(RESTART_DELAY)),
                    "{:?} on {:?}",
                    state,
                    input
                );
            }
            assert_eq!(transition(state, Input::Prompt, &profile), Transition::Stay);
        }
    }

    #[test]
    fn station_failures_fall_back_to_hosting() {
        let profile = Profile {
            station: true,
            static_ip: false,
        };
        for state in [ModemState::StationIp, ModemState::JoinQuery, ModemState::Join] {
            let Transition::Go(step) = transition(state, Input::Fail, &profile) else {
                panic!("failure must move");
            };
            assert_eq!(step.next, ModemState::ModeAfterStationError);
            assert_eq!(step.command, Some(AtCommand::Mode(WifiMode::Both)));
        }
        let Transition::Go(step) =
            transition(ModemState::ModeAfterStationError, Input::Ok, &profile)
        else {
            panic!("ok must move");
        };
        assert_eq!(step.command, Some(AtCommand::ApDhcp));
    }

    #[test]
    fn matching_association_skips_join() {
        let profile = Profile {
            station: true,
            static_ip: false,
        };
        let Transition::Go(step) = transition(ModemState::JoinQuery, Input::ApMatch, &profile)
        else {
            panic!("match must move");
        };
        assert_eq!(step.next, ModemState::Join);
        assert_eq!(step.command, None);
        let Transition::Go(step) = transition(ModemState::Join, Input::Ok, &profile) else {
            panic!("ok must move");
        };
        assert_eq!(step.command, Some(AtCommand::Listen));
    }

    #[test]
    fn stop_listen_ignores_its_result() {
        let profile = Profile::default();
        for input in [Input::Timeout, Input::Ok, Input::Error] {
            let Transition::Go(step) = transition(ModemState::ServerStop, input, &profile) else {
                panic!("must move");
            };
            assert_eq!(step.next, ModemState::Mode);
        }
    }

    #[test]
    fn send_sequence_reports_outcome() {
        let profile = Profile::default();
        assert_eq!(
            transition(ModemState::Send, Input::Ok, &profile),
            Transition::Stay
        );
        let Transition::Go(step) = transition(ModemState::Send, Input::Prompt, &profile) else {
            panic!("prompt must move");
        };
        assert_eq!(step.command, Some(AtCommand::Payload));
        assert_eq!(
            transition(ModemState::SendData, Input::SendOk, &profile),
            Transition::Go(Step::ready(Some(SendOutcome::Complete)))
        );
        assert_eq!(
            transition(ModemState::SendData, Input::Timeout, &profile),
            Transition::Go(Step::ready(Some(SendOutcome::Failed)))
        );
        assert_eq!(
            transition(ModemState::Send, Input::Timeout, &profile),
            Transition::Go(Step::ready(Some(SendOutcome::Failed)))
        );
    }

    #[test]
    fn busy_reset_skips_command_when_already_restarting() {
        let step = Step::busy_reset(ModemState::Join);
        assert_eq!(step.next, ModemState::InitRequired);
        assert_eq!(step.command, Some(AtCommand::Reset));
        assert_eq!(step.delay, RESTART_DELAY);

        let step = Step::busy_reset(ModemState::InitRequired);
        assert_eq!(step.command, None);
        assert_eq!(step.delay, RESTART_DELAY);
    }
}
