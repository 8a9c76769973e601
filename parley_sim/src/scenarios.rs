//! Built-in scenarios run by the CLI and the CI seed sweep.
//!
//! Each one pairs a timeline with the agent script it is meant to pass
//! against, so every built-in is green on any seed.

use serde_json::json;

use crate::error::HarnessError;
use crate::scenario::Scenario;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Two-turn booking in a quiet room
    HotelBookingBasic,

    /// Same booking over office noise, transient noises and a 4G link
    HotelBookingNoisy,

    /// The user cuts the agent off mid-answer
    HotelBookingInterrupt,

    /// Booking service is down; the agent must retry then apologise
    FlakyBooking,

    /// Connection drops while the user is talking
    ElevatorDropout,

    /// Follow-up depends on whether the booking went through
    BranchingBooking,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::HotelBookingBasic,
            ScenarioId::HotelBookingNoisy,
            ScenarioId::HotelBookingInterrupt,
            ScenarioId::FlakyBooking,
            ScenarioId::ElevatorDropout,
            ScenarioId::BranchingBooking,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::HotelBookingBasic => "hotel_booking_basic",
            ScenarioId::HotelBookingNoisy => "hotel_booking_noisy",
            ScenarioId::HotelBookingInterrupt => "hotel_booking_interrupt",
            ScenarioId::FlakyBooking => "flaky_booking",
            ScenarioId::ElevatorDropout => "elevator_dropout",
            ScenarioId::BranchingBooking => "branching_booking",
        }
    }

    /// Returns the scenario description.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::HotelBookingBasic => "Intent recognition and availability lookup over a clean channel",
            ScenarioId::HotelBookingNoisy => "Booking with office ambience, a dog bark and a background talker",
            ScenarioId::HotelBookingInterrupt => "User interrupts a long answer; agent must stop and listen",
            ScenarioId::FlakyBooking => "create_booking always fails; agent retries and reports the failure",
            ScenarioId::ElevatorDropout => "Uplink drops for 1.5s mid-utterance, then degrades to elevator quality",
            ScenarioId::BranchingBooking => "Assertions branch on whether create_booking succeeded",
        }
    }

    /// Builds the scenario.
    pub fn scenario(&self) -> Result<Scenario, HarnessError> {
        let document = match self {
            ScenarioId::HotelBookingBasic => json!({
                "name": self.name(),
                "description": self.description(),
                "tags": ["booking", "smoke"],
                "stub": {
                    "turns": [
                        { "intent": "hotel_booking", "reply": "Sure, for which dates?", "speak_ms": 1500 },
                        {
                            "tool_call": {
                                "name": "check_availability",
                                "args": { "checkin": "next_friday", "nights": 2 }
                            },
                            "reply": "We have rooms available",
                            "think_ms": 1120
                        }
                    ]
                },
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "I want to book a hotel" },
                    { "at": "3s", "action": "assert_system", "expect": { "intent": "hotel_booking" } },
                    { "at": "5s", "action": "user_speak", "audio": "Next Friday for two nights" },
                    {
                        "at": "8s",
                        "action": "expect_tool_call",
                        "tool": "check_availability",
                        "args_contain": { "checkin": "next_friday", "nights": 2 },
                        "timeout_ms": 5000
                    }
                ]
            }),
            ScenarioId::HotelBookingNoisy => json!({
                "name": self.name(),
                "description": self.description(),
                "tags": ["booking", "noise", "network"],
                "environment": {
                    "noise_profile": "office",
                    "network": { "profile": "good_4g" }
                },
                "stub": {
                    "turns": [
                        { "intent": "hotel_booking", "reply": "Sure, for which dates?", "speak_ms": 1500 },
                        {
                            "tool_call": {
                                "name": "check_availability",
                                "args": { "checkin": "next_friday", "nights": 2 }
                            },
                            "reply": "We have rooms available"
                        }
                    ]
                },
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "I want to book a hotel" },
                    { "at": "1s", "action": "inject_noise", "type": "transient", "source": "dog_bark" },
                    { "at": "4s", "action": "assert_system", "expect": { "intent": "hotel_booking" } },
                    { "at": "5s", "action": "inject_noise", "type": "competing_speech", "duration_ms": 3000 },
                    { "at": "5s", "action": "user_speak", "audio": "Next Friday for two nights",
                      "speech_style": { "speed": 0.9 } },
                    {
                        "at": "8.5s",
                        "action": "expect_tool_call",
                        "tool": "check_availability",
                        "args_contain": { "checkin": "next_friday" },
                        "timeout_ms": 5000
                    },
                    { "at": "11s", "action": "assert_system", "expect": { "response_contains": "rooms" } }
                ]
            }),
            ScenarioId::HotelBookingInterrupt => json!({
                "name": self.name(),
                "description": self.description(),
                "tags": ["booking", "barge_in"],
                "stub": {
                    "turns": [
                        {
                            "intent": "hotel_booking",
                            "reply": "We have standard rooms, king rooms and suites, let me describe each one",
                            "speak_ms": 8000
                        },
                        { "intent": "clarification", "reply": "Of course, what would you like?", "speak_ms": 1000 }
                    ]
                },
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "I want to book a hotel" },
                    { "at": "2s", "action": "barge_in", "pattern": "eager_interrupt" },
                    {
                        "at": "7s",
                        "action": "assert_system",
                        "expect": { "state": "listening", "intent": "clarification" }
                    },
                    {
                        "at": "7s",
                        "action": "assert_system",
                        "expect": { "response_contains": "what would you like" }
                    }
                ]
            }),
            ScenarioId::FlakyBooking => json!({
                "name": self.name(),
                "description": self.description(),
                "tags": ["booking", "tools", "failure"],
                "tools": { "create_booking": { "failure_rate": 1.0 } },
                "stub": {
                    "turns": [{
                        "intent": "create_booking",
                        "tool_call": {
                            "name": "create_booking",
                            "args": { "checkin": "next_friday", "nights": 2 }
                        },
                        "retry_on_failure": 2,
                        "reply": "Your booking is confirmed",
                        "failure_reply": "Sorry, the booking service is unavailable right now"
                    }]
                },
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "Book the king room for Friday" },
                    { "at": "2s", "action": "expect_tool_call", "tool": "create_booking", "timeout_ms": 5000 },
                    {
                        "at": "10s",
                        "action": "conditional",
                        "condition": "tool_succeeded:create_booking",
                        "branches": {
                            "false": [{
                                "at": 0,
                                "action": "assert_system",
                                "expect": { "response_contains": "unavailable", "did_not_say": "confirmed" }
                            }],
                            "true": [{
                                "at": 0,
                                "action": "assert_system",
                                "expect": { "response_contains": "confirmed" }
                            }]
                        }
                    }
                ]
            }),
            ScenarioId::ElevatorDropout => json!({
                "name": self.name(),
                "description": self.description(),
                "tags": ["network"],
                "environment": { "network": { "profile": "good_4g" } },
                "stub": {
                    "turns": [
                        { "intent": "hotel_booking", "reply": "Sure, for which dates?", "speak_ms": 1000 },
                        {
                            "tool_call": {
                                "name": "check_availability",
                                "args": { "checkin": "next_friday", "nights": 2 }
                            },
                            "reply": "We have rooms available"
                        }
                    ]
                },
                "timeline": [
                    { "at": "0s", "action": "network_disconnect", "duration_ms": 1500 },
                    { "at": "0s", "action": "user_speak", "audio": "I want to book a hotel" },
                    { "at": "3s", "action": "set_network", "profile": "elevator" },
                    { "at": "4s", "action": "assert_system", "expect": { "intent": "hotel_booking" } },
                    { "at": "4.5s", "action": "set_network", "profile": "good_4g" },
                    { "at": "5s", "action": "user_speak", "audio": "Next Friday for two nights" },
                    {
                        "at": "9s",
                        "action": "expect_tool_call",
                        "tool": "check_availability",
                        "args_contain": { "nights": 2 },
                        "timeout_ms": 5000
                    }
                ]
            }),
            ScenarioId::BranchingBooking => json!({
                "name": self.name(),
                "description": self.description(),
                "tags": ["booking", "conditional"],
                "stub": {
                    "turns": [
                        {
                            "intent": "create_booking",
                            "tool_call": { "name": "create_booking", "args": { "checkin": "next_friday" } },
                            "reply": "Your booking is confirmed",
                            "failure_reply": "Sorry, I could not complete the booking"
                        },
                        {
                            "tool_call": { "name": "get_booking_details", "args": { "booking_id": "BK20240115001" } },
                            "reply": "It is a king room for two nights"
                        }
                    ]
                },
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "Book it for next Friday" },
                    { "at": "1s", "action": "expect_tool_call", "tool": "create_booking", "timeout_ms": 5000 },
                    {
                        "at": "6s",
                        "action": "conditional",
                        "condition": "tool_succeeded:create_booking",
                        "branches": {
                            "true": [
                                { "at": 0, "action": "assert_system", "expect": { "response_contains": "confirmed" } },
                                { "at": "500ms", "action": "user_speak", "audio": "What did I book?" },
                                {
                                    "at": "1s",
                                    "action": "expect_tool_call",
                                    "tool": "get_booking_details",
                                    "timeout_ms": 5000
                                }
                            ],
                            "default": [
                                {
                                    "at": 0,
                                    "action": "assert_system",
                                    "expect": { "response_contains": "could not", "did_not_call": "get_booking_details" }
                                }
                            ]
                        }
                    }
                ]
            }),
        };
        Scenario::from_value(document)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == s.to_lowercase().replace('-', "_"))
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}
