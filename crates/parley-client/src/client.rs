//! The [`ChatClient`] façade wiring the synchronization core together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_net::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, Connectivity,
    Connector, WsConnector,
};
use parley_shared::{fallback_name, ChatId, ChatSummary, UserId, UserProfile};

use crate::chat_list::{ChatListSnapshot, ChatListSynchronizer};
use crate::collaborators::{
    ChatDirectory, HttpChatDirectory, HttpMessageStore, HttpUserDirectory, MessageStore,
    NewChat, UserDirectory,
};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::history::HistoryLoader;
use crate::notices::{Notice, Notices};
use crate::router::{EchoLedger, MessageRouter};
use crate::send::{SendCoordinator, SendOutcome};
use crate::session::Session;
use crate::view::{InputBuffer, MessageListView, ViewEntry};

/// What the connectivity indicator should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityStatus {
    pub connectivity: Connectivity,
    /// Whether [`ChatClient::retry_now`] would be accepted.
    pub can_retry: bool,
}

/// One signed-in user's chat session.
///
/// Must be created inside a tokio runtime. Dropping the client stops its
/// background tasks and the connection manager.
pub struct ChatClient {
    session: Session,
    connection: ConnectionManager,
    view: MessageListView,
    input: InputBuffer,
    chat_list: ChatListSynchronizer,
    sender: SendCoordinator,
    router: MessageRouter,
    history: HistoryLoader,
    directory: Arc<dyn ChatDirectory>,
    user_directory: Arc<dyn UserDirectory>,
    users: watch::Sender<Vec<UserProfile>>,
    notices: Notices,
    logged_out: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatClient {
    pub fn new(
        user_id: UserId,
        connector: Arc<dyn Connector>,
        directory: Arc<dyn ChatDirectory>,
        store: Arc<dyn MessageStore>,
        user_directory: Arc<dyn UserDirectory>,
        config: ConnectionConfig,
    ) -> Self {
        let session = Session::new(user_id.clone());
        let connection = ConnectionManager::spawn(connector, config);
        let view = MessageListView::new();
        let input = InputBuffer::new();
        let notices = Notices::new();
        let echoes = EchoLedger::new();
        let chat_list = ChatListSynchronizer::spawn(Arc::clone(&directory), user_id);

        let router = MessageRouter::new(
            session.clone(),
            view.clone(),
            chat_list.clone(),
            echoes.clone(),
        );
        let sender = SendCoordinator::new(
            session.clone(),
            view.clone(),
            input.clone(),
            Arc::clone(&store),
            connection.clone(),
            echoes,
            notices.clone(),
        );
        let history = HistoryLoader::new(session.clone(), view.clone(), store);
        let (users, _) = watch::channel(Vec::new());

        Self {
            session,
            connection,
            view,
            input,
            chat_list,
            sender,
            router,
            history,
            directory,
            user_directory,
            users,
            notices,
            logged_out: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build a client talking to the services named in `config`.
    pub fn from_config(user_id: UserId, config: &ClientConfig) -> Result<Self> {
        let connector = Arc::new(WsConnector::new(&config.push_url)?);
        let directory = Arc::new(HttpChatDirectory::new(
            &config.chats_url,
            config.http_timeout,
        )?);
        let store = Arc::new(HttpMessageStore::new(
            &config.messages_url,
            config.http_timeout,
        )?);
        let user_directory = Arc::new(HttpUserDirectory::new(
            &config.users_url,
            config.http_timeout,
        )?);
        Ok(Self::new(
            user_id,
            connector,
            directory,
            store,
            user_directory,
            config.connection_config(),
        ))
    }

    /// Start routing inbound frames, open the channel and load the chat list
    /// and users directory. A users directory failure only leaves names
    /// unresolved.
    pub async fn start(&self) -> Result<()> {
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            if tasks.is_empty() {
                let events = self.connection.subscribe();
                tasks.push(tokio::spawn(route_events(
                    self.router.clone(),
                    self.history.clone(),
                    self.chat_list.clone(),
                    events,
                )));
                tasks.push(tokio::spawn(watch_connectivity(
                    self.connection.watch_state(),
                    self.notices.clone(),
                    Arc::clone(&self.logged_out),
                )));
            }
        }

        info!(user = %self.session.user_id(), "Starting chat client");
        self.connection
            .connect(self.session.user_id().clone())
            .await?;
        self.chat_list.request_refresh();
        if let Err(e) = self.refresh_users().await {
            warn!(error = %e, "Failed to load users directory");
        }
        Ok(())
    }

    /// Reload the users directory. The previous list is kept on failure.
    pub async fn refresh_users(&self) -> Result<()> {
        let users = self.user_directory.list_users().await?;
        debug!(count = users.len(), "Users directory loaded");
        self.users.send_replace(users);
        Ok(())
    }

    pub fn users(&self) -> Vec<UserProfile> {
        self.users.borrow().clone()
    }

    pub fn watch_users(&self) -> watch::Receiver<Vec<UserProfile>> {
        self.users.subscribe()
    }

    /// Display name for `user_id`, or a placeholder naming the id when the
    /// directory does not know the user.
    pub fn user_name(&self, user_id: &UserId) -> String {
        self.users
            .borrow()
            .iter()
            .find(|u| &u.id == user_id)
            .map(UserProfile::display_name)
            .unwrap_or_else(|| fallback_name(user_id))
    }

    /// Make `chat_id` the active chat and load its history.
    pub async fn select_chat(&self, chat_id: ChatId) -> Result<()> {
        info!(chat = %chat_id, "Selecting chat");
        self.session.set_active(Some(chat_id.clone()));
        self.view.reset(Some(chat_id.clone()));

        if let Err(e) = self.history.load(&chat_id).await {
            warn!(chat = %chat_id, error = %e, "Failed to load chat history");
            return Err(e);
        }
        Ok(())
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.input.set(text);
    }

    pub fn draft(&self) -> String {
        self.input.get()
    }

    /// Send `content` to the active chat.
    pub async fn send(&self, content: &str) -> SendOutcome {
        self.sender.send(content).await
    }

    /// Send whatever is in the input buffer.
    pub async fn send_draft(&self) -> SendOutcome {
        let draft = self.input.get();
        self.sender.send(&draft).await
    }

    pub async fn create_chat(
        &self,
        participant_ids: Vec<UserId>,
        name: Option<String>,
    ) -> Result<ChatId> {
        let request = NewChat {
            creator_id: self.session.user_id().clone(),
            participant_ids,
            name: name.filter(|n| !n.trim().is_empty()),
        };
        match self.directory.create_chat(&request).await {
            Ok(chat_id) => {
                info!(chat = %chat_id, "Chat created");
                self.chat_list.request_refresh();
                Ok(chat_id)
            }
            Err(e) => {
                warn!(error = %e, "Chat creation failed");
                self.notices.post(Notice::ChatCreationFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Reconnect immediately. Accepted only while waiting to reconnect or
    /// after automatic attempts gave up.
    pub async fn retry_now(&self) -> Result<()> {
        self.connection.retry_now().await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await?;
        Ok(())
    }

    /// Close the channel for good and forget the active chat.
    pub async fn logout(&self) -> Result<()> {
        info!(user = %self.session.user_id(), "Logging out");
        self.logged_out.store(true, Ordering::SeqCst);
        self.connection.logout().await?;
        self.session.set_active(None);
        self.view.reset(None);
        self.input.clear();
        Ok(())
    }

    /// Refresh the chat list and wait for the result.
    pub async fn refresh_chats(&self) -> Result<()> {
        self.chat_list.refresh().await
    }

    pub fn connectivity(&self) -> ConnectivityStatus {
        let state = self.connection.state();
        let retryable = matches!(
            state,
            ConnectionState::Abandoned | ConnectionState::ReconnectScheduled { .. }
        );
        ConnectivityStatus {
            connectivity: state.connectivity(),
            can_retry: retryable && !self.logged_out.load(Ordering::SeqCst),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn chats(&self) -> Vec<ChatSummary> {
        self.chat_list.chats()
    }

    pub fn watch_chats(&self) -> watch::Receiver<ChatListSnapshot> {
        self.chat_list.watch()
    }

    pub fn messages(&self) -> Vec<ViewEntry> {
        self.view.entries()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        self.connection.shutdown();
    }
}

/// Feed channel events to the router, in order, on one task.
async fn route_events(
    router: MessageRouter,
    history: HistoryLoader,
    chat_list: ChatListSynchronizer,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    let mut opened_before = false;

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Frame(raw) => {
                router.dispatch(&raw);
            }
            ConnectionEvent::Opened => {
                if opened_before {
                    // Frames may have been missed while the channel was down.
                    info!("Channel reopened, resynchronizing");
                    chat_list.request_refresh();
                    if let Some(chat_id) = history.session().active_chat() {
                        let history = history.clone();
                        tokio::spawn(async move {
                            if let Err(e) = history.load(&chat_id).await {
                                warn!(
                                    chat = %chat_id,
                                    error = %e,
                                    "Resync of active chat failed"
                                );
                            }
                        });
                    }
                }
                opened_before = true;
            }
            ConnectionEvent::Closed { code, reason } => {
                debug!(code, reason = %reason, "Channel closed");
            }
            ConnectionEvent::Error(error) => {
                debug!(error = %error, "Channel error");
            }
        }
    }
    debug!("Event routing stopped");
}

/// Turn connection state changes into user-facing notices.
async fn watch_connectivity(
    mut state: watch::Receiver<ConnectionState>,
    notices: Notices,
    logged_out: Arc<AtomicBool>,
) {
    let mut previous = *state.borrow_and_update();

    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        match (previous, current) {
            (_, ConnectionState::Abandoned)
                if previous != ConnectionState::Abandoned
                    && !logged_out.load(Ordering::SeqCst) =>
            {
                notices.post(Notice::ConnectionAbandoned);
            }
            (
                ConnectionState::Open,
                ConnectionState::ReconnectScheduled { .. } | ConnectionState::Connecting,
            ) => {
                notices.post(Notice::ConnectionLost);
            }
            _ => {}
        }
        previous = current;
    }
}
