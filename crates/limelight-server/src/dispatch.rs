use limelight_game::GameEngine;
use limelight_types::chat::{ActionEvent, ChatEvent, MessageEvent, PresenceEvent};
use tracing::debug;

/// Everything a handler needs. Cloned into each spawned handler task.
#[derive(Clone)]
pub struct BotContext {
    pub engine: GameEngine,
    pub jwt_secret: String,
}

pub type MessageHandler = fn(&BotContext, &MessageEvent);
pub type ActionHandler = fn(&BotContext, &ActionEvent);
pub type PresenceHandler = fn(&BotContext, &PresenceEvent);

/// Routes inbound chat events to registered handlers. Command handlers
/// match on a text prefix, action handlers on the action id. Every match
/// runs as its own blocking task; handlers are unordered and non-exclusive,
/// so a command message still reaches the catch-all message handlers.
pub struct EventDispatcher {
    ctx: BotContext,
    commands: Vec<(&'static str, MessageHandler)>,
    messages: Vec<MessageHandler>,
    actions: Vec<(&'static str, ActionHandler)>,
    presence: Vec<PresenceHandler>,
}

impl EventDispatcher {
    pub fn new(ctx: BotContext) -> Self {
        Self {
            ctx,
            commands: Vec::new(),
            messages: Vec::new(),
            actions: Vec::new(),
            presence: Vec::new(),
        }
    }

    /// Register a handler for messages starting with `prefix`.
    pub fn command(mut self, prefix: &'static str, handler: MessageHandler) -> Self {
        self.commands.push((prefix, handler));
        self
    }

    /// Register a handler that sees every message.
    pub fn on_message(mut self, handler: MessageHandler) -> Self {
        self.messages.push(handler);
        self
    }

    pub fn action(mut self, action_id: &'static str, handler: ActionHandler) -> Self {
        self.actions.push((action_id, handler));
        self
    }

    pub fn on_presence(mut self, handler: PresenceHandler) -> Self {
        self.presence.push(handler);
        self
    }

    pub fn dispatch(&self, event: ChatEvent) {
        match event {
            ChatEvent::Message(msg) => {
                let text = msg.text.trim_start();
                for (prefix, handler) in &self.commands {
                    if text.starts_with(prefix) {
                        self.spawn_message(*handler, msg.clone());
                    }
                }
                for handler in &self.messages {
                    self.spawn_message(*handler, msg.clone());
                }
            }
            ChatEvent::Action(action) => {
                for (action_id, handler) in &self.actions {
                    if action.action_id == *action_id {
                        let ctx = self.ctx.clone();
                        let handler = *handler;
                        let action = action.clone();
                        tokio::task::spawn_blocking(move || handler(&ctx, &action));
                    }
                }
            }
            ChatEvent::Presence(presence) => {
                for handler in &self.presence {
                    let ctx = self.ctx.clone();
                    let handler = *handler;
                    let presence = presence.clone();
                    tokio::task::spawn_blocking(move || handler(&ctx, &presence));
                }
            }
        }
    }

    fn spawn_message(&self, handler: MessageHandler, msg: MessageEvent) {
        debug!("dispatching message {} to handler", msg.message_id);
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || handler(&ctx, &msg));
    }
}
