//! Canonical agent/tool lifecycle event names.
//!
//! These five strings are the reserved event types backend workers emit;
//! everything else is free-form.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    AgentStarted,
    AgentThinking,
    ToolExecuting,
    ToolCompleted,
    AgentCompleted,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 5] = [
        LifecycleEvent::AgentStarted,
        LifecycleEvent::AgentThinking,
        LifecycleEvent::ToolExecuting,
        LifecycleEvent::ToolCompleted,
        LifecycleEvent::AgentCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::AgentStarted => "agent_started",
            LifecycleEvent::AgentThinking => "agent_thinking",
            LifecycleEvent::ToolExecuting => "tool_executing",
            LifecycleEvent::ToolCompleted => "tool_completed",
            LifecycleEvent::AgentCompleted => "agent_completed",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleEvent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent_started" => Ok(LifecycleEvent::AgentStarted),
            "agent_thinking" => Ok(LifecycleEvent::AgentThinking),
            "tool_executing" => Ok(LifecycleEvent::ToolExecuting),
            "tool_completed" => Ok(LifecycleEvent::ToolCompleted),
            "agent_completed" => Ok(LifecycleEvent::AgentCompleted),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for event in LifecycleEvent::ALL {
            assert_eq!(event.as_str().parse::<LifecycleEvent>(), Ok(event));
        }
    }

    #[test]
    fn test_unknown_name_rejected() {
        assert!("agent_paused".parse::<LifecycleEvent>().is_err());
    }
}
