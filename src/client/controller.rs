/// Notification controller for one signed-in user
///
/// Local state mirrors the server inbox. Live-stream frames and foreground
/// pushes are applied as they arrive; `mark_as_read` updates locally first
/// and reconciles with the server when persisting fails.
use super::{NotificationBackend, Permission, PushPlatform};
use crate::{
    error::{NotifyError, NotifyResult},
    inbox::InboxFrame,
    models::{InboxNotification, NotificationPayload},
    preferences::{NotificationPreferences, PreferenceUpdate},
    tokens::redact,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::{collections::HashSet, sync::Arc};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Snapshot of everything the controller tracks
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    pub supported: bool,
    pub permission: Permission,
    /// Registration token this device last registered
    pub token: Option<String>,
    /// Newest first
    pub notifications: Vec<InboxNotification>,
    pub unread_count: usize,
    pub preferences: Option<NotificationPreferences>,
    pub last_message: Option<NotificationPayload>,
}

impl ControllerState {
    fn recount(&mut self) {
        self.unread_count = self.notifications.iter().filter(|n| !n.is_read).count();
    }

    fn apply(&mut self, frame: InboxFrame) {
        match frame {
            InboxFrame::Snapshot { notifications } => {
                self.notifications = notifications;
            }
            InboxFrame::Created { notification } => {
                if !self.notifications.iter().any(|n| n.id == notification.id) {
                    self.notifications.insert(0, notification);
                }
            }
            InboxFrame::Read { ids } => {
                for n in self.notifications.iter_mut().filter(|n| ids.contains(&n.id)) {
                    n.is_read = true;
                }
            }
            InboxFrame::Deleted { id } => {
                self.notifications.retain(|n| n.id != id);
            }
        }
        self.recount();
    }
}

#[derive(Clone)]
pub struct NotificationController {
    user_id: String,
    platform: Arc<dyn PushPlatform>,
    backend: Arc<dyn NotificationBackend>,
    state: Arc<RwLock<ControllerState>>,
}

impl NotificationController {
    pub fn new(
        user_id: impl Into<String>,
        platform: Arc<dyn PushPlatform>,
        backend: Arc<dyn NotificationBackend>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            platform,
            backend,
            state: Arc::new(RwLock::new(ControllerState::default())),
        }
    }

    /// Read platform support and permission, then load the inbox
    pub async fn init(&self) -> NotifyResult<()> {
        let supported = self.platform.is_supported().await;
        let permission = if supported {
            self.platform.permission().await
        } else {
            Permission::Denied
        };

        {
            let mut state = self.state.write().await;
            state.supported = supported;
            state.permission = permission;
        }

        if permission == Permission::Granted {
            if let Err(e) = self.sync_token().await {
                warn!("Failed to sync push token on init: {}", e);
            }
        }

        self.refresh_inbox().await
    }

    pub async fn state(&self) -> ControllerState {
        self.state.read().await.clone()
    }

    pub async fn permission(&self) -> Permission {
        self.state.read().await.permission
    }

    pub async fn unread_count(&self) -> usize {
        self.state.read().await.unread_count
    }

    pub async fn notifications(&self) -> Vec<InboxNotification> {
        self.state.read().await.notifications.clone()
    }

    /// Ask for push permission and register this device's token
    ///
    /// Returns true once permission is granted and the token is stored.
    /// Calling again after a grant returns true without prompting.
    pub async fn request_permission(&self) -> NotifyResult<bool> {
        {
            let state = self.state.read().await;
            if !state.supported {
                return Ok(false);
            }
            if state.permission == Permission::Granted && state.token.is_some() {
                return Ok(true);
            }
        }

        let permission = match self.state.read().await.permission {
            Permission::Granted => Permission::Granted,
            _ => self.platform.request_permission().await?,
        };
        self.state.write().await.permission = permission;

        if permission != Permission::Granted {
            info!("Push permission not granted: {:?}", permission);
            return Ok(false);
        }

        self.register_token().await?;
        Ok(true)
    }

    /// Re-register when permission is granted but the service holds no token
    pub async fn sync_token(&self) -> NotifyResult<()> {
        if self.state.read().await.permission != Permission::Granted {
            return Ok(());
        }

        let tokens = self.backend.list_tokens().await?;
        if tokens.is_empty() {
            debug!("No tokens registered for {}; re-registering", self.user_id);
            self.register_token().await?;
        } else {
            let mut state = self.state.write().await;
            if state.token.is_none() {
                state.token = tokens.into_iter().last();
            }
        }
        Ok(())
    }

    async fn register_token(&self) -> NotifyResult<()> {
        let token = self.platform.registration_token().await?;
        self.backend.store_token(&token).await?;
        info!("Registered push token {}", redact(&token));
        self.state.write().await.token = Some(token);
        Ok(())
    }

    /// Delete the held token server-side and treat permission as revoked
    pub async fn remove_token(&self) -> NotifyResult<()> {
        let token = self.state.read().await.token.clone();
        if let Some(token) = token {
            self.backend.delete_token(&token).await?;
            info!("Removed push token {}", redact(&token));
        }

        let mut state = self.state.write().await;
        state.token = None;
        state.permission = Permission::Denied;
        Ok(())
    }

    /// Replace local notifications with the server's latest page
    pub async fn refresh_inbox(&self) -> NotifyResult<()> {
        let notifications = self.backend.fetch_inbox().await?;
        self.state
            .write()
            .await
            .apply(InboxFrame::Snapshot { notifications });
        Ok(())
    }

    /// Mark notifications read locally, then persist
    ///
    /// When persisting fails the inbox is refetched; if that fails too the
    /// flags flipped here are restored. The original error is returned.
    pub async fn mark_as_read(&self, ids: &[String]) -> NotifyResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let flipped: Vec<String> = {
            let mut state = self.state.write().await;
            let mut flipped = Vec::new();
            for n in state.notifications.iter_mut() {
                if !n.is_read && ids.contains(&n.id) {
                    n.is_read = true;
                    flipped.push(n.id.clone());
                }
            }
            state.recount();
            flipped
        };

        let err = match self.backend.mark_read(ids).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!("Failed to persist read state: {}", err);

        if let Err(refetch_err) = self.refresh_inbox().await {
            warn!("Inbox refetch failed, rolling back read flags: {}", refetch_err);
            let flipped: HashSet<&String> = flipped.iter().collect();
            let mut state = self.state.write().await;
            for n in state.notifications.iter_mut().filter(|n| flipped.contains(&n.id)) {
                n.is_read = false;
            }
            state.recount();
        }

        Err(err)
    }

    /// Handle a push that arrived while the app is in the foreground
    ///
    /// Not deduplicated against the live stream, which may deliver the same
    /// notification as an inbox record.
    pub async fn on_foreground_message(&self, payload: NotificationPayload) {
        let permission = {
            let mut state = self.state.write().await;
            state.notifications.insert(
                0,
                InboxNotification {
                    id: Uuid::new_v4().to_string(),
                    user_id: self.user_id.clone(),
                    notification_type: payload.notification_type,
                    title: payload.title.clone(),
                    body: payload.body.clone(),
                    data: payload.data.clone(),
                    image_url: payload.image_url.clone(),
                    created_at: Utc::now(),
                    is_read: false,
                },
            );
            state.recount();
            state.last_message = Some(payload.clone());
            state.permission
        };

        if permission == Permission::Granted {
            if let Err(e) = self.platform.show_notification(&payload).await {
                warn!("Failed to show foreground notification: {}", e);
            }
        }
    }

    pub async fn apply_stream_frame(&self, frame: InboxFrame) {
        self.state.write().await.apply(frame);
    }

    /// Connect to the live inbox and apply its frames until it closes
    pub async fn subscribe_inbox(&self, stream_url: &str) -> NotifyResult<JoinHandle<()>> {
        let (mut ws_stream, _) = connect_async(stream_url)
            .await
            .map_err(|e| NotifyError::Internal(format!("Failed to connect to inbox stream: {}", e)))?;
        info!("Connected to inbox stream for {}", self.user_id);

        let controller = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<InboxFrame>(&text) {
                        Ok(frame) => controller.apply_stream_frame(frame).await,
                        Err(e) => warn!("Failed to parse inbox frame: {}", e),
                    },
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = ws_stream.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("Inbox stream closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Inbox stream error: {}", e);
                        break;
                    }
                }
            }
        }))
    }

    pub async fn load_preferences(&self) -> NotifyResult<NotificationPreferences> {
        let preferences = self.backend.get_preferences().await?;
        self.state.write().await.preferences = Some(preferences);
        Ok(preferences)
    }

    /// Persist a partial update and merge it into the local copy
    pub async fn update_preferences(&self, update: PreferenceUpdate) -> NotifyResult<()> {
        self.backend.put_preferences(&update).await?;

        let mut state = self.state.write().await;
        let mut merged = state.preferences.unwrap_or_default();
        merged.apply(&update);
        state.preferences = Some(merged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationType;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakePlatform {
        supported: bool,
        current: Mutex<Permission>,
        answer: Permission,
        prompts: Mutex<usize>,
        shown: Mutex<Vec<String>>,
    }

    impl FakePlatform {
        fn new(current: Permission, answer: Permission) -> Self {
            Self {
                supported: true,
                current: Mutex::new(current),
                answer,
                prompts: Mutex::new(0),
                shown: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PushPlatform for FakePlatform {
        async fn is_supported(&self) -> bool {
            self.supported
        }

        async fn permission(&self) -> Permission {
            *self.current.lock().unwrap()
        }

        async fn request_permission(&self) -> NotifyResult<Permission> {
            *self.prompts.lock().unwrap() += 1;
            *self.current.lock().unwrap() = self.answer;
            Ok(self.answer)
        }

        async fn registration_token(&self) -> NotifyResult<String> {
            Ok("device-token-1".to_string())
        }

        async fn show_notification(&self, payload: &NotificationPayload) -> NotifyResult<()> {
            self.shown.lock().unwrap().push(payload.title.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        tokens: Mutex<Vec<String>>,
        inbox: Mutex<Vec<InboxNotification>>,
        fail_mark_read: bool,
        fail_fetch: Mutex<bool>,
        preferences: Mutex<NotificationPreferences>,
    }

    #[async_trait]
    impl NotificationBackend for FakeBackend {
        async fn store_token(&self, token: &str) -> NotifyResult<()> {
            let mut tokens = self.tokens.lock().unwrap();
            if !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_string());
            }
            Ok(())
        }

        async fn delete_token(&self, token: &str) -> NotifyResult<()> {
            self.tokens.lock().unwrap().retain(|t| t != token);
            Ok(())
        }

        async fn list_tokens(&self) -> NotifyResult<Vec<String>> {
            Ok(self.tokens.lock().unwrap().clone())
        }

        async fn fetch_inbox(&self) -> NotifyResult<Vec<InboxNotification>> {
            if *self.fail_fetch.lock().unwrap() {
                return Err(NotifyError::Internal("offline".into()));
            }
            Ok(self.inbox.lock().unwrap().clone())
        }

        async fn mark_read(&self, ids: &[String]) -> NotifyResult<()> {
            if self.fail_mark_read {
                return Err(NotifyError::Internal("write failed".into()));
            }
            for n in self.inbox.lock().unwrap().iter_mut() {
                if ids.contains(&n.id) {
                    n.is_read = true;
                }
            }
            Ok(())
        }

        async fn get_preferences(&self) -> NotifyResult<NotificationPreferences> {
            Ok(*self.preferences.lock().unwrap())
        }

        async fn put_preferences(&self, update: &PreferenceUpdate) -> NotifyResult<()> {
            self.preferences.lock().unwrap().apply(update);
            Ok(())
        }
    }

    fn record(id: &str, is_read: bool) -> InboxNotification {
        InboxNotification {
            id: id.to_string(),
            user_id: "alice".to_string(),
            notification_type: NotificationType::General,
            title: format!("title {}", id),
            body: "body".to_string(),
            data: BTreeMap::new(),
            image_url: None,
            created_at: Utc::now(),
            is_read,
        }
    }

    fn controller(platform: FakePlatform, backend: FakeBackend) -> (NotificationController, Arc<FakePlatform>, Arc<FakeBackend>) {
        let platform = Arc::new(platform);
        let backend = Arc::new(backend);
        let controller = NotificationController::new("alice", platform.clone(), backend.clone());
        (controller, platform, backend)
    }

    #[tokio::test]
    async fn test_request_permission_registers_token_once() {
        let (controller, platform, backend) = controller(
            FakePlatform::new(Permission::Default, Permission::Granted),
            FakeBackend::default(),
        );
        controller.init().await.unwrap();

        assert!(controller.request_permission().await.unwrap());
        assert!(controller.request_permission().await.unwrap());

        assert_eq!(*platform.prompts.lock().unwrap(), 1);
        assert_eq!(*backend.tokens.lock().unwrap(), vec!["device-token-1"]);
        assert_eq!(controller.permission().await, Permission::Granted);
    }

    #[tokio::test]
    async fn test_request_permission_denied() {
        let (controller, _platform, backend) = controller(
            FakePlatform::new(Permission::Default, Permission::Denied),
            FakeBackend::default(),
        );
        controller.init().await.unwrap();

        assert!(!controller.request_permission().await.unwrap());
        assert!(backend.tokens.lock().unwrap().is_empty());
        assert_eq!(controller.permission().await, Permission::Denied);
    }

    #[tokio::test]
    async fn test_init_resyncs_missing_token() {
        let (controller, _platform, backend) = controller(
            FakePlatform::new(Permission::Granted, Permission::Granted),
            FakeBackend::default(),
        );
        controller.init().await.unwrap();

        assert_eq!(*backend.tokens.lock().unwrap(), vec!["device-token-1"]);
        assert_eq!(controller.state().await.token.as_deref(), Some("device-token-1"));
    }

    #[tokio::test]
    async fn test_remove_token_revokes_locally() {
        let (controller, _platform, backend) = controller(
            FakePlatform::new(Permission::Default, Permission::Granted),
            FakeBackend::default(),
        );
        controller.init().await.unwrap();
        controller.request_permission().await.unwrap();

        controller.remove_token().await.unwrap();

        assert!(backend.tokens.lock().unwrap().is_empty());
        let state = controller.state().await;
        assert!(state.token.is_none());
        assert_eq!(state.permission, Permission::Denied);
    }

    #[tokio::test]
    async fn test_mark_as_read_persists() {
        let backend = FakeBackend::default();
        *backend.inbox.lock().unwrap() = vec![record("n2", false), record("n1", false)];
        let (controller, _platform, backend) =
            controller(FakePlatform::new(Permission::Default, Permission::Granted), backend);
        controller.init().await.unwrap();
        assert_eq!(controller.unread_count().await, 2);

        controller.mark_as_read(&["n1".to_string()]).await.unwrap();

        assert_eq!(controller.unread_count().await, 1);
        let server = backend.inbox.lock().unwrap().clone();
        assert!(server.iter().find(|n| n.id == "n1").unwrap().is_read);
    }

    #[tokio::test]
    async fn test_mark_as_read_reconciles_from_server() {
        let backend = FakeBackend {
            fail_mark_read: true,
            ..Default::default()
        };
        *backend.inbox.lock().unwrap() = vec![record("n2", false), record("n1", false)];
        let (controller, _platform, _backend) =
            controller(FakePlatform::new(Permission::Default, Permission::Granted), backend);
        controller.init().await.unwrap();

        assert!(controller.mark_as_read(&["n1".to_string()]).await.is_err());

        // Server never recorded the read, so the refetch restores it
        assert_eq!(controller.unread_count().await, 2);
    }

    #[tokio::test]
    async fn test_mark_as_read_rolls_back_when_offline() {
        let backend = FakeBackend {
            fail_mark_read: true,
            ..Default::default()
        };
        *backend.inbox.lock().unwrap() = vec![record("n2", true), record("n1", false)];
        let (controller, _platform, backend) =
            controller(FakePlatform::new(Permission::Default, Permission::Granted), backend);
        controller.init().await.unwrap();
        *backend.fail_fetch.lock().unwrap() = true;

        let ids = vec!["n1".to_string(), "n2".to_string()];
        assert!(controller.mark_as_read(&ids).await.is_err());

        let notifications = controller.notifications().await;
        assert!(!notifications.iter().find(|n| n.id == "n1").unwrap().is_read);
        // Already read before the call, so untouched by the rollback
        assert!(notifications.iter().find(|n| n.id == "n2").unwrap().is_read);
        assert_eq!(controller.unread_count().await, 1);
    }

    #[tokio::test]
    async fn test_foreground_message_shown_when_granted() {
        let (controller, platform, _backend) = controller(
            FakePlatform::new(Permission::Default, Permission::Granted),
            FakeBackend::default(),
        );
        controller.init().await.unwrap();

        let payload = NotificationPayload::new(NotificationType::General, "Hello", "World", BTreeMap::new());
        controller.on_foreground_message(payload.clone()).await;
        assert_eq!(controller.unread_count().await, 1);
        assert!(platform.shown.lock().unwrap().is_empty());

        controller.request_permission().await.unwrap();
        controller.on_foreground_message(payload).await;

        let state = controller.state().await;
        assert_eq!(state.notifications.len(), 2);
        assert_eq!(state.last_message.as_ref().map(|p| p.title.as_str()), Some("Hello"));
        assert_eq!(*platform.shown.lock().unwrap(), vec!["Hello"]);
    }

    #[tokio::test]
    async fn test_apply_stream_frames() {
        let (controller, _platform, _backend) = controller(
            FakePlatform::new(Permission::Default, Permission::Granted),
            FakeBackend::default(),
        );

        controller
            .apply_stream_frame(InboxFrame::Snapshot {
                notifications: vec![record("n1", false)],
            })
            .await;
        controller
            .apply_stream_frame(InboxFrame::Created {
                notification: record("n2", false),
            })
            .await;
        // Duplicate create is ignored
        controller
            .apply_stream_frame(InboxFrame::Created {
                notification: record("n2", false),
            })
            .await;
        assert_eq!(controller.unread_count().await, 2);
        assert_eq!(controller.notifications().await[0].id, "n2");

        controller
            .apply_stream_frame(InboxFrame::Read {
                ids: vec!["n1".to_string()],
            })
            .await;
        assert_eq!(controller.unread_count().await, 1);

        controller
            .apply_stream_frame(InboxFrame::Deleted { id: "n2".to_string() })
            .await;
        assert_eq!(controller.unread_count().await, 0);
        assert_eq!(controller.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_preferences_merges() {
        let (controller, _platform, backend) = controller(
            FakePlatform::new(Permission::Default, Permission::Granted),
            FakeBackend::default(),
        );
        controller.load_preferences().await.unwrap();

        controller
            .update_preferences(PreferenceUpdate {
                recommendations: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();

        let local = controller.state().await.preferences.unwrap();
        assert!(!local.recommendations);
        assert!(local.movie_reviews);
        assert!(!backend.preferences.lock().unwrap().recommendations);
    }
}
