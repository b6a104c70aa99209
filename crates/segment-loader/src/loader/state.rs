use crate::request::RequestKind;

/// Aggregation of the fetches issued for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateState {
    Pending { outstanding: usize },
    /// A fetch failed or was cancelled. Latched.
    Errored,
    /// Every fetch succeeded, the payload is being decrypted and dispatched.
    Completing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Succeeded(RequestKind),
    Failed(RequestKind),
}

/// What the driver has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Wait,
    AbortAll,
    AllDone,
    Ignored,
}

impl AggregateState {
    pub fn new(total: usize) -> Self {
        Self::Pending { outstanding: total }
    }

    pub fn on(&mut self, outcome: FetchOutcome) -> Transition {
        let Self::Pending { outstanding } = *self else {
            return Transition::Ignored;
        };

        match outcome {
            FetchOutcome::Failed(_) => {
                *self = Self::Errored;
                Transition::AbortAll
            }
            FetchOutcome::Succeeded(_) if outstanding <= 1 => {
                *self = Self::Completing;
                Transition::AllDone
            }
            FetchOutcome::Succeeded(_) => {
                *self = Self::Pending {
                    outstanding: outstanding - 1,
                };
                Transition::Wait
            }
        }
    }

    /// Settles a completing aggregation.
    pub fn complete(&mut self) {
        if *self == Self::Completing {
            *self = Self::Done;
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}
