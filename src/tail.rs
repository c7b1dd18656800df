//! The live tail: an ordered, most-recent-first view fed either by the push
//! transport or by explicit backlog fetches.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::cursor::{ScrollBand, SelectionCursor};
use crate::event::{LogEvent, QuickAction};
use crate::transport::{
    Connector, SessionId, SessionState, TailTransport, TransportError, TransportEvent,
    TransportMessage,
};

/// A rendered event together with the commands its quick-action keys fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRow {
    pub event: LogEvent,
    pub actions: Vec<QuickAction>,
}

impl TailRow {
    pub fn new(event: LogEvent) -> Self {
        let actions = event.quick_actions();
        Self { event, actions }
    }

    pub fn action(&self, label: &str) -> Option<&QuickAction> {
        self.actions.iter().find(|action| action.label == label)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TailView {
    rows: VecDeque<TailRow>,
    cursor: SelectionCursor,
    band: ScrollBand,
    limit: Option<usize>,
}

impl TailView {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &TailRow> {
        self.rows.iter()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor.position()
    }

    pub fn selected(&self) -> Option<&TailRow> {
        self.cursor.position().and_then(|pos| self.rows.get(pos))
    }

    /// Renders one event on top. A cursor below the top row stays on the
    /// event it was on.
    pub fn push_front(&mut self, event: LogEvent) {
        self.rows.push_front(TailRow::new(event));
        let len = self.rows.len();
        match self.cursor.position() {
            Some(pos) if pos > 0 => {
                self.cursor.jump_to(pos + 1, len);
            }
            _ => {
                self.cursor.sync_len(len);
            }
        }
        if let Some(limit) = self.limit
            && self.rows.len() > limit
        {
            self.rows.truncate(limit);
            self.cursor.sync_len(self.rows.len());
        }
    }

    /// Swaps in a whole backlog at once, in the order given.
    pub fn replace(&mut self, events: Vec<LogEvent>) {
        self.rows = events.into_iter().map(TailRow::new).collect();
        self.cursor.sync_len(self.rows.len());
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.cursor.sync_len(0);
    }

    pub fn move_cursor(&mut self, delta: isize) -> bool {
        self.cursor.move_by(delta, self.rows.len())
    }

    pub fn follow_cursor(&mut self, viewport: usize) -> usize {
        self.band
            .follow(self.cursor.position(), self.rows.len(), viewport)
    }
}

pub enum Feed<C> {
    Push(TailTransport<C>),
    Pull,
}

pub struct Tail<C> {
    feed: Feed<C>,
    view: TailView,
    paused: bool,
    state: SessionState,
    last_error: Option<TransportError>,
    refresh_pending: bool,
}

impl<C: Connector> Tail<C> {
    pub fn push(transport: TailTransport<C>) -> Self {
        Self::with_feed(Feed::Push(transport))
    }

    /// Opens the push session. Pull mode waits for an explicit refresh.
    pub fn start(&mut self) {
        if let Feed::Push(transport) = &mut self.feed
            && !self.paused
        {
            transport.open();
        }
    }

    /// Hard disconnect. The view stays frozen as it was and anything the
    /// server sends until `resume` is lost.
    pub fn pause(&mut self) -> bool {
        let Feed::Push(transport) = &mut self.feed else {
            return false;
        };
        if self.paused {
            return false;
        }
        self.paused = true;
        transport.close();
        self.state = SessionState::Closed;
        info!("tail paused");
        true
    }

    /// Clears the frozen view and opens a fresh session.
    pub fn resume(&mut self) -> bool {
        let Feed::Push(transport) = &mut self.feed else {
            return false;
        };
        if !self.paused {
            return false;
        }
        self.paused = false;
        self.view.clear();
        self.last_error = None;
        transport.open();
        info!("tail resumed");
        true
    }

    pub fn toggle_pause(&mut self) -> bool {
        if self.paused { self.resume() } else { self.pause() }
    }
}

impl<C> Tail<C> {
    pub fn pull() -> Self {
        Self::with_feed(Feed::Pull)
    }

    fn with_feed(feed: Feed<C>) -> Self {
        Self {
            feed,
            view: TailView::default(),
            paused: false,
            state: SessionState::Closed,
            last_error: None,
            refresh_pending: false,
        }
    }

    /// Keeps at most `limit` rows, dropping the oldest. `None` keeps all.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.view.limit = limit;
        self
    }

    pub fn view(&self) -> &TailView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut TailView {
        &mut self.view
    }

    pub fn is_push(&self) -> bool {
        matches!(self.feed, Feed::Push(_))
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_pending
    }

    pub fn session(&self) -> Option<SessionId> {
        match &self.feed {
            Feed::Push(transport) => transport.session(),
            Feed::Pull => None,
        }
    }

    /// Applies one transport message. Messages from a session that is no
    /// longer the open one are dropped. Returns whether anything changed.
    pub fn on_message(&mut self, message: TransportMessage) -> bool {
        if self.paused || self.session() != Some(message.session) {
            debug!(session = ?message.session, "dropping message from stale session");
            return false;
        }
        match message.event {
            TransportEvent::Event(event) => {
                self.view.push_front(event);
            }
            TransportEvent::State(state) => {
                if state == SessionState::Open {
                    self.last_error = None;
                }
                self.state = state;
            }
            TransportEvent::Error(err) => {
                self.last_error = Some(err);
            }
        }
        true
    }

    /// Empties the view. The session is untouched.
    pub fn clear(&mut self) {
        self.view.clear();
    }

    /// Marks a backlog fetch as outstanding. Refused in push mode and while
    /// another fetch is still out.
    pub fn begin_refresh(&mut self) -> bool {
        if self.is_push() || self.refresh_pending {
            return false;
        }
        self.refresh_pending = true;
        true
    }

    pub fn finish_refresh(&mut self, backlog: Option<Vec<LogEvent>>) {
        self.refresh_pending = false;
        if let Some(events) = backlog {
            debug!(events = events.len(), "tail backlog replaced");
            self.view.replace(events);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::ReconnectPolicy;
    use crate::transport::testing::{ScriptedConnector, event};

    fn message(session: SessionId, event: TransportEvent) -> TransportMessage {
        TransportMessage { session, event }
    }

    fn times(view: &TailView) -> Vec<String> {
        view.rows().map(|row| row.event.time.clone()).collect()
    }

    #[tokio::test]
    async fn connect_event_renders_on_top_without_path_action() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut tail = Tail::push(TailTransport::new(
            ScriptedConnector::default(),
            ReconnectPolicy::Immediate,
            tx,
        ));
        tail.start();
        let session = tail.session().expect("session open");

        let get = LogEvent {
            path: "/x".to_string(),
            ..event("10:00", "GET", "a.com")
        };
        tail.on_message(message(session, TransportEvent::Event(get)));
        tail.on_message(message(
            session,
            TransportEvent::Event(event("10:01", "CONNECT", "b.com")),
        ));

        let rows: Vec<&TailRow> = tail.view().rows().collect();
        assert_eq!(rows[0].event.time, "10:01");
        assert!(rows[0].action("Path").is_none());
        assert_eq!(rows[0].actions.len(), 2);
        assert_eq!(rows[1].event.time, "10:00");
        assert_eq!(rows[1].actions.len(), 3);
    }

    #[tokio::test]
    async fn pause_twice_closes_once_and_resume_twice_opens_once() {
        let connector = ScriptedConnector::default();
        let connects = connector.counter();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut tail = Tail::push(TailTransport::new(connector, ReconnectPolicy::Immediate, tx));
        tail.start();
        let first = tail.session().expect("session open");
        tail.on_message(message(first, TransportEvent::Event(event("10:00", "GET", "a"))));

        assert!(tail.pause());
        assert!(!tail.pause());
        assert_eq!(tail.session(), None);
        assert_eq!(tail.view().len(), 1);

        tail.on_message(message(first, TransportEvent::Event(event("10:01", "GET", "a"))));
        assert_eq!(tail.view().len(), 1);

        assert!(tail.resume());
        assert!(!tail.resume());
        assert!(tail.view().is_empty());
        let second = tail.session().expect("fresh session");
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_session_messages_are_dropped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut tail = Tail::push(TailTransport::new(
            ScriptedConnector::default(),
            ReconnectPolicy::Immediate,
            tx,
        ));
        tail.start();
        let first = tail.session().expect("session open");
        tail.pause();
        tail.resume();
        assert!(!tail.on_message(message(
            first,
            TransportEvent::Event(event("09:59", "GET", "old"))
        )));
        assert!(tail.view().is_empty());
    }

    #[test]
    fn pull_refresh_replaces_atomically() {
        let mut tail: Tail<ScriptedConnector> = Tail::pull();
        assert!(!tail.pause());
        assert!(tail.begin_refresh());
        assert!(!tail.begin_refresh());
        tail.finish_refresh(Some(vec![
            event("10:02", "GET", "c"),
            event("10:01", "GET", "b"),
        ]));
        assert_eq!(times(tail.view()), vec!["10:02", "10:01"]);

        assert!(tail.begin_refresh());
        tail.finish_refresh(None);
        assert_eq!(tail.view().len(), 2);

        tail.begin_refresh();
        tail.finish_refresh(Some(vec![event("10:03", "GET", "d")]));
        assert_eq!(times(tail.view()), vec!["10:03"]);
        assert_eq!(tail.view().cursor(), Some(0));
    }

    #[test]
    fn cursor_keeps_its_event_when_rows_arrive() {
        let mut view = TailView::default();
        view.push_front(event("1", "GET", "a"));
        view.push_front(event("2", "GET", "b"));
        view.push_front(event("3", "GET", "c"));
        assert_eq!(view.cursor(), Some(0));
        view.move_cursor(1);
        view.push_front(event("4", "GET", "d"));
        assert_eq!(view.selected().map(|row| row.event.time.as_str()), Some("2"));
        view.clear();
        assert_eq!(view.cursor(), None);
    }

    #[test]
    fn limited_view_drops_oldest_rows() {
        let mut tail = Tail::<ScriptedConnector>::pull().with_limit(Some(3));
        let view = tail.view_mut();
        view.push_front(event("1", "GET", "a"));
        view.push_front(event("2", "GET", "b"));
        view.move_cursor(1);
        view.push_front(event("3", "GET", "c"));
        assert_eq!(view.selected().map(|row| row.event.time.as_str()), Some("1"));
        view.push_front(event("4", "GET", "d"));
        view.push_front(event("5", "GET", "e"));
        assert_eq!(times(view), vec!["5", "4", "3"]);
        assert_eq!(view.cursor(), Some(2));
    }

    proptest! {
        #[test]
        fn view_is_receipt_order_reversed(count in 0usize..60) {
            let mut view = TailView::default();
            let received: Vec<String> = (0..count).map(|n| format!("{:04}", n)).collect();
            for time in &received {
                view.push_front(event(time, "GET", "h"));
            }
            let mut expected = received.clone();
            expected.reverse();
            prop_assert_eq!(view.len(), count);
            prop_assert_eq!(times(&view), expected);
        }
    }
}
