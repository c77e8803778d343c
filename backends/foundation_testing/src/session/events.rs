//! Ordered record of delegate callbacks.

use std::path::PathBuf;

use foundation_urlsession::{
    AuthChallenge, CachedResponse, Request, Response, SessionError, SessionId, SessionTask,
};

/// A value carried by a delegate callback.
#[derive(Debug, Clone)]
pub enum EventParameter {
    Session(SessionId),
    Task(SessionTask),
    Response(Response),
    Request(Request),
    Challenge(AuthChallenge),
    Data(Vec<u8>),
    Count(u64),
    ExpectedCount(Option<u64>),
    Error(Option<SessionError>),
    Location(PathBuf),
    CachedResponse(CachedResponse),
    /// Stream halves were handed over; the halves themselves live in the observer.
    Streams,
}

/// One observed callback: its name and the values it carried.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub parameters: Vec<EventParameter>,
}

impl Event {
    /// First task parameter, usually the task the callback belongs to.
    #[must_use]
    pub fn task(&self) -> Option<&SessionTask> {
        self.parameters.iter().find_map(|parameter| match parameter {
            EventParameter::Task(task) => Some(task),
            _ => None,
        })
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.parameters.iter().find_map(|parameter| match parameter {
            EventParameter::Response(response) => Some(response),
            _ => None,
        })
    }

    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        self.parameters.iter().find_map(|parameter| match parameter {
            EventParameter::Request(request) => Some(request),
            _ => None,
        })
    }

    #[must_use]
    pub fn challenge(&self) -> Option<&AuthChallenge> {
        self.parameters.iter().find_map(|parameter| match parameter {
            EventParameter::Challenge(challenge) => Some(challenge),
            _ => None,
        })
    }

    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.parameters.iter().find_map(|parameter| match parameter {
            EventParameter::Data(data) => Some(data.as_slice()),
            _ => None,
        })
    }

    /// The error parameter; `None` both when absent and when the callback carried no error.
    #[must_use]
    pub fn error(&self) -> Option<&SessionError> {
        self.parameters.iter().find_map(|parameter| match parameter {
            EventParameter::Error(error) => error.as_ref(),
            _ => None,
        })
    }

    /// Every `Count` parameter in order.
    #[must_use]
    pub fn counts(&self) -> Vec<u64> {
        self.parameters
            .iter()
            .filter_map(|parameter| match parameter {
                EventParameter::Count(count) => Some(*count),
                _ => None,
            })
            .collect()
    }
}

/// Append-only, ordered event record. Consecutive duplicates are kept.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, name: impl Into<String>, parameters: Vec<EventParameter>) {
        let name = name.into();
        tracing::debug!("Observed {}", name);
        self.events.push(Event { name, parameters });
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.events.iter().map(|event| event.name.as_str()).collect()
    }

    /// Comma-joined names in arrival order, duplicates included.
    #[must_use]
    pub fn event_sequence(&self) -> String {
        self.names().join(",")
    }

    /// Comma-joined names with runs of the same name collapsed into one.
    #[must_use]
    pub fn collapsed_event_sequence(&self) -> String {
        let mut names = self.names();
        names.dedup();
        names.join(",")
    }

    #[must_use]
    pub fn first(&self) -> Option<&Event> {
        self.events.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Events named `name`, in order.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |event| event.name == name)
    }

    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.named(name).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
