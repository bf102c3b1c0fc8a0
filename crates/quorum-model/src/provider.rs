// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::{assemble::Accumulator, catalog, Completion, CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// The single abstraction the runtime needs from any model provider.
///
/// Providers implement [`stream`]; the blocking [`generate`] path is derived
/// by draining the stream through the shared [`Accumulator`], so delta
/// reassembly (including tool-call JSON) behaves identically on both paths.
///
/// [`stream`]: ModelProvider::stream
/// [`generate`]: ModelProvider::generate
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Canonical provider id (e.g. `"anthropic"`).
    fn name(&self) -> &str;

    /// Model identifier as forwarded to the API.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Blocking completion: drain the stream and reassemble the full turn.
    async fn generate(&self, req: CompletionRequest) -> anyhow::Result<Completion> {
        let mut stream = self.stream(req).await?;
        let mut acc = Accumulator::new();
        while let Some(event) = stream.next().await {
            if acc.push(event?) {
                break;
            }
        }
        Ok(acc.finish())
    }

    /// Context window for this provider/model, from the static catalog.
    fn context_window(&self) -> u32 {
        catalog::context_window(self.name(), self.model_name())
    }

    /// Output-token ceiling for this provider/model, from the static catalog.
    fn max_output_tokens(&self) -> u32 {
        catalog::lookup(self.name(), self.model_name())
            .map(|e| e.max_output_tokens)
            .unwrap_or(catalog::DEFAULT_MAX_OUTPUT_TOKENS)
    }
}
