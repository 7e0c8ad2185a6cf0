pub mod general_message;
pub mod message;

use chrono::FixedOffset;
use std::sync::Arc;
use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        UpdateHandler,
    },
    prelude::*,
};

use crate::bot::commands::{notifications, Command};
use crate::database::connection::DatabaseManager;
use crate::database::models::Notification;
use crate::services::notifications::NotificationService;
use crate::services::provider::DataProvider;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type HandlerResult = Result<(), HandlerError>;

/// Per-chat conversation state
#[derive(Debug, Clone, Default)]
pub enum BotState {
    #[default]
    Idle,
    /// `/edit` was issued; the live task is cancelled until the edit is
    /// committed or aborted
    EditingNotification { original: Notification },
}

pub type BotDialogue = Dialogue<BotState, InMemStorage<BotState>>;

/// Everything command handlers need
pub struct BotContext {
    pub db: DatabaseManager,
    pub notifications: NotificationService,
    pub provider: Arc<dyn DataProvider>,
    pub offset: FixedOffset,
}

pub struct BotHandler {
    ctx: Arc<BotContext>,
}

impl BotHandler {
    pub fn new(ctx: BotContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn schema(&self) -> UpdateHandler<HandlerError> {
        let command_ctx = self.ctx.clone();
        let edit_ctx = self.ctx.clone();

        let commands = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command, dialogue: BotDialogue| {
                let ctx = command_ctx.clone();
                async move { message::command_handler(bot, msg, cmd, dialogue, ctx).await }
            },
        );

        let edit_replies = dptree::case![BotState::EditingNotification { original }].endpoint(
            move |bot: Bot, msg: Message, dialogue: BotDialogue, original: Notification| {
                let ctx = edit_ctx.clone();
                async move { notifications::handle_edit_reply(bot, msg, dialogue, original, ctx).await }
            },
        );

        dialogue::enter::<Update, InMemStorage<BotState>, BotState, _>()
            .branch(commands)
            .branch(
                Update::filter_message()
                    .branch(edit_replies)
                    .branch(dptree::endpoint(general_message::handle_general_message)),
            )
    }
}
