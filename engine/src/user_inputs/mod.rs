//! Built-in user input library
//!
//! User inputs shape the outbound message of a me step before it is sent.
//! Registered names (recognized in me sections only):
//!
//! | Name | Behavior |
//! |------|----------|
//! | `BUTTON` | attach a button click: `BUTTON text\|payload` |
//! | `MEDIA` | attach a media item by URI |
//! | `FORM` | attach one form field: `FORM name\|value` |

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::plugin::{HookContext, UserInput};
use sdk::types::{Button, FormField, Media};
use std::sync::Arc;

use crate::dispatch::PluginRegistry;

/// Register the built-in user inputs under their script names
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register_user_input("BUTTON", Arc::new(ButtonInput));
    registry.register_user_input("MEDIA", Arc::new(MediaInput));
    registry.register_user_input("FORM", Arc::new(FormInput));
}

/// Attach a button click to the outbound message
pub struct ButtonInput;

#[async_trait]
impl UserInput for ButtonInput {
    fn name(&self) -> &str {
        "BUTTON"
    }

    async fn set_user_input(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        let text = ctx.required_arg(0, "BUTTON")?.to_string();
        let payload = ctx.arg(1).map(String::from);
        if let Some(me_msg) = ctx.me_msg.as_deref_mut() {
            me_msg.buttons.push(Button { text, payload });
        }
        Ok(())
    }
}

/// Attach a media item to the outbound message
pub struct MediaInput;

#[async_trait]
impl UserInput for MediaInput {
    fn name(&self) -> &str {
        "MEDIA"
    }

    async fn set_user_input(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        let media_uri = ctx.required_arg(0, "MEDIA")?.to_string();
        let mime_type = ctx.arg(1).map(String::from);
        if let Some(me_msg) = ctx.me_msg.as_deref_mut() {
            me_msg.media.push(Media {
                media_uri,
                alt_text: None,
                mime_type,
            });
        }
        Ok(())
    }
}

/// Attach one form field to the outbound message
pub struct FormInput;

#[async_trait]
impl UserInput for FormInput {
    fn name(&self) -> &str {
        "FORM"
    }

    async fn set_user_input(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        let name = ctx.required_arg(0, "FORM")?.to_string();
        let value = ctx.arg(1).map(String::from);
        if let Some(me_msg) = ctx.me_msg.as_deref_mut() {
            me_msg.forms.push(FormField { name, value });
        }
        Ok(())
    }
}
