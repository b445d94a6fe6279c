#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Success,
    Error,
}

/// Outcome history of a polling loop.
///
/// Starts out as if the last request had succeeded, so the first error of a
/// session is treated as following a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStateMachine {
    previous: ResponseState,
    current: ResponseState,
    consecutive_error_count: u32,
}

impl Default for ResponseStateMachine {
    fn default() -> Self {
        Self {
            previous: ResponseState::Success,
            current: ResponseState::Success,
            consecutive_error_count: 0,
        }
    }
}

impl ResponseStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: ResponseState) {
        self.previous = self.current;
        self.current = state;
        match state {
            ResponseState::Success => self.consecutive_error_count = 0,
            ResponseState::Error => {
                self.consecutive_error_count = self.consecutive_error_count.saturating_add(1)
            }
        }
    }

    pub fn previous_state(&self) -> ResponseState {
        self.previous
    }

    pub fn current_state(&self) -> ResponseState {
        self.current
    }

    pub fn consecutive_error_count(&self) -> u32 {
        self.consecutive_error_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_consecutive_errors() {
        let mut machine = ResponseStateMachine::new();
        assert_eq!(machine.current_state(), ResponseState::Success);

        machine.push(ResponseState::Error);
        machine.push(ResponseState::Error);
        assert_eq!(machine.consecutive_error_count(), 2);
        assert_eq!(machine.previous_state(), ResponseState::Error);

        machine.push(ResponseState::Success);
        assert_eq!(machine.consecutive_error_count(), 0);
        assert_eq!(machine.previous_state(), ResponseState::Error);
        assert_eq!(machine.current_state(), ResponseState::Success);
    }
}
