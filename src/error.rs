use crate::dsp::graph::NodeId;
use thiserror::Error;

/// Errors surfaced by the audio engine.
///
/// None of these are fatal to the host: playback degrades to silence or to
/// the default timbre.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The audio context could not be created or resumed.
    #[error("audio not initialized: {0}")]
    GraphUnavailable(String),
    /// A node was stopped or disconnected after it was already disposed.
    #[error("disposal race: {0}")]
    DisposalRace(NodeError),
    /// A note's nodes could not be connected or scheduled.
    #[error("could not wire voice: {0}")]
    GraphWiring(NodeError),
    /// A timbre style outside the known set.
    #[error("unknown timbre style '{0}'")]
    UnknownStyle(String),
    /// Non-positive or non-finite note duration.
    #[error("invalid note request: {0}")]
    InvalidNoteRequest(String),
    /// Engine configuration could not be parsed.
    #[error("invalid engine config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Node-level failures reported by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node {0:?} has been released")]
    Released(NodeId),
    #[error("node {0:?} was already started")]
    AlreadyStarted(NodeId),
    #[error("node {0:?} has already ended")]
    AlreadyStopped(NodeId),
    #[error("node {0:?} is not a tone source")]
    NotASource(NodeId),
    #[error("node {0:?} is owned by the context")]
    Protected(NodeId),
}

