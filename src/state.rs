//! Turn-based state holder with an injected transition rule
//!
//! [`StateManager`] knows nothing about transport. Callers feed it moves (local
//! or received over the data channel) and it only ever replaces the current
//! state with one the rule accepted.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid state transition")]
    InvalidTransition,

    #[error("state serialization failed: {0}")]
    Serialization(String),
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// Game rule: how a move changes a state, and whether that change is legal.
pub trait StateTransition<S, M> {
    /// Compute the state that results from `mv`. Must not have side effects.
    fn apply(&self, state: &S, mv: &M) -> S;

    /// Whether going from `state` to `next` through `mv` is allowed.
    fn is_valid(&self, state: &S, next: &S, mv: &M) -> bool;
}

type Subscriber<S> = Box<dyn FnMut(&S) + Send>;

pub struct StateManager<S, M, T> {
    current: S,
    transition: T,
    on_update: Option<Subscriber<S>>,
    _move: std::marker::PhantomData<fn(&M)>,
}

impl<S, M, T> StateManager<S, M, T>
where
    S: Clone + Serialize,
    T: StateTransition<S, M>,
{
    pub fn new(initial: S, transition: T) -> Self {
        Self {
            current: initial,
            transition,
            on_update: None,
            _move: std::marker::PhantomData,
        }
    }

    /// Validate and apply a move.
    ///
    /// On rejection the current state is left exactly as it was and the
    /// subscriber is not called.
    pub fn apply_move(&mut self, mv: &M) -> Result<&S, StateError> {
        let next = self.transition.apply(&self.current, mv);
        if !self.transition.is_valid(&self.current, &next, mv) {
            return Err(StateError::InvalidTransition);
        }

        self.current = next;
        if let Some(cb) = self.on_update.as_mut() {
            cb(&self.current);
        }
        Ok(&self.current)
    }

    pub fn state(&self) -> &S {
        &self.current
    }

    /// Hex SHA-256 of the state's JSON form.
    pub fn state_hash(&self) -> Result<String, StateError> {
        let json = self.to_json()?;
        Ok(hex::encode(Sha256::digest(json.as_bytes())))
    }

    /// Check a proposed transition without applying it.
    pub fn verify_transition(&self, prev: &S, next: &S, mv: &M) -> bool {
        self.transition.is_valid(prev, next, mv)
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string(&self.current).map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// Register the update subscriber. Only one is kept: a second call
    /// replaces the first.
    pub fn on_state_update(&mut self, callback: impl FnMut(&S) + Send + 'static) {
        self.on_update = Some(Box::new(callback));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde::Serialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Board {
        cells: [Option<char>; 9],
        next: char,
    }

    impl Board {
        fn empty() -> Self {
            Self {
                cells: [None; 9],
                next: 'X',
            }
        }
    }

    #[derive(Debug)]
    struct Mark {
        player: char,
        cell: usize,
    }

    struct TicTacToe;

    impl StateTransition<Board, Mark> for TicTacToe {
        fn apply(&self, state: &Board, mv: &Mark) -> Board {
            let mut next = state.clone();
            if mv.cell < 9 {
                next.cells[mv.cell] = Some(mv.player);
            }
            next.next = if mv.player == 'X' { 'O' } else { 'X' };
            next
        }

        fn is_valid(&self, state: &Board, next: &Board, mv: &Mark) -> bool {
            mv.cell < 9
                && mv.player == state.next
                && state.cells[mv.cell].is_none()
                && next.cells[mv.cell] == Some(mv.player)
        }
    }

    #[test]
    fn valid_move_is_applied() {
        let mut manager = StateManager::new(Board::empty(), TicTacToe);
        let state = manager.apply_move(&Mark { player: 'X', cell: 4 }).unwrap();
        assert_eq!(state.cells[4], Some('X'));
        assert_eq!(manager.state().next, 'O');
    }

    #[test]
    fn rejected_move_leaves_state_untouched() {
        let mut manager = StateManager::new(Board::empty(), TicTacToe);
        manager.apply_move(&Mark { player: 'X', cell: 0 }).unwrap();
        let before = manager.state().clone();
        let hash_before = manager.state_hash().unwrap();

        // wrong player, occupied cell, out of range
        for mv in [
            Mark { player: 'X', cell: 1 },
            Mark { player: 'O', cell: 0 },
            Mark { player: 'O', cell: 42 },
        ] {
            assert_eq!(manager.apply_move(&mv), Err(StateError::InvalidTransition));
            assert_eq!(manager.state(), &before);
        }
        assert_eq!(manager.state_hash().unwrap(), hash_before);
    }

    #[test]
    fn subscriber_fires_only_on_accepted_moves() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut manager = StateManager::new(Board::empty(), TicTacToe);
        let sink = seen.clone();
        manager.on_state_update(move |s: &Board| sink.lock().unwrap().push(s.next));

        manager.apply_move(&Mark { player: 'X', cell: 0 }).unwrap();
        let _ = manager.apply_move(&Mark { player: 'X', cell: 1 });
        manager.apply_move(&Mark { player: 'O', cell: 1 }).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!['O', 'X']);
    }

    #[test]
    fn second_subscriber_replaces_first() {
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));
        let mut manager = StateManager::new(Board::empty(), TicTacToe);

        let f = first.clone();
        manager.on_state_update(move |_: &Board| *f.lock().unwrap() += 1);
        let s = second.clone();
        manager.on_state_update(move |_: &Board| *s.lock().unwrap() += 1);

        manager.apply_move(&Mark { player: 'X', cell: 0 }).unwrap();
        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[test]
    fn state_hash_tracks_content() {
        let mut manager = StateManager::new(Board::empty(), TicTacToe);
        let empty = manager.state_hash().unwrap();
        assert_eq!(empty.len(), 64);
        assert_eq!(empty, StateManager::new(Board::empty(), TicTacToe).state_hash().unwrap());

        manager.apply_move(&Mark { player: 'X', cell: 0 }).unwrap();
        assert_ne!(manager.state_hash().unwrap(), empty);
    }

    #[test]
    fn verify_transition_does_not_apply() {
        let manager = StateManager::new(Board::empty(), TicTacToe);
        let mv = Mark { player: 'X', cell: 2 };
        let next = TicTacToe.apply(manager.state(), &mv);
        assert!(manager.verify_transition(manager.state(), &next, &mv));
        assert_eq!(manager.state(), &Board::empty());
    }

    #[test]
    fn to_json_serializes_current_state() {
        let manager = StateManager::new(Board::empty(), TicTacToe);
        let json = manager.to_json().unwrap();
        assert!(json.contains("\"next\":\"X\""));
    }
}
