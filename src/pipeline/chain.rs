//! Ordered composition of stages.
//!
//! Stages are listed outermost first and composed right to left, like
//! function composition: in `compose([a, b, c])` the context flows through
//! `c`, then `b`, then `a`.

use crate::pipeline::stage::{ContextStream, Stage};

/// An ordered, immutable-once-registered sequence of stages.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    /// Outermost first; the last entry sees the context first.
    stages: Vec<Stage>,
}

impl TransformChain {
    /// An empty chain; contexts pass through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose stages right to left.
    pub fn compose(stages: impl IntoIterator<Item = Stage>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
        }
    }

    /// Add a stage that runs after every stage already in the chain.
    pub fn after(mut self, stage: Stage) -> Self {
        self.stages.insert(0, stage);
        self
    }

    /// Add a stage that runs before every stage already in the chain.
    pub fn before(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Swap the stage called `name` for `stage`, keeping its position.
    /// The chain is returned unchanged when no stage has that name.
    pub fn replace(mut self, name: &str, stage: Stage) -> Self {
        if let Some(slot) = self.stages.iter_mut().find(|s| s.name() == name) {
            *slot = stage;
        } else {
            tracing::warn!(stage = name, "No stage to replace");
        }
        self
    }

    /// Remove every stage called `name`.
    pub fn without(mut self, name: &str) -> Self {
        self.stages.retain(|s| s.name() != name);
        self
    }

    /// Stage names in the order a context visits them.
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().rev().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run `input` through every stage.
    pub fn apply(&self, input: ContextStream) -> ContextStream {
        self.stages
            .iter()
            .rev()
            .fold(input, |stream, stage| stage.apply(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::DispatchContext;
    use crate::testing::{context_stream, TestRequest};
    use futures_util::StreamExt;

    #[derive(Debug, Clone, Default)]
    struct Trail(Vec<&'static str>);

    fn tag(name: &'static str) -> Stage {
        Stage::map(name, move |ctx: DispatchContext| {
            let mut trail = ctx.extension::<Trail>().cloned().unwrap_or_default();
            trail.0.push(name);
            ctx.with_extension(trail)
        })
    }

    async fn trail(chain: &TransformChain) -> Vec<&'static str> {
        let (ctx, _) = TestRequest::get("/").build();
        let out: Vec<_> = chain.apply(context_stream(vec![ctx])).collect().await;
        let ctx = out.into_iter().next().unwrap().unwrap();
        ctx.extension::<Trail>().cloned().unwrap_or_default().0
    }

    #[tokio::test]
    async fn test_compose_runs_right_to_left() {
        let chain = TransformChain::compose([tag("a"), tag("b"), tag("c")]);
        assert_eq!(trail(&chain).await, vec!["c", "b", "a"]);
        assert_eq!(chain.stage_names(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_before_and_after() {
        let chain = TransformChain::compose([tag("a"), tag("b")])
            .before(tag("first"))
            .after(tag("last"));
        assert_eq!(trail(&chain).await, vec!["first", "b", "a", "last"]);
    }

    #[tokio::test]
    async fn test_replace_keeps_position() {
        let chain = TransformChain::compose([tag("a"), tag("b"), tag("c")]).replace("b", tag("x"));
        assert_eq!(trail(&chain).await, vec!["c", "x", "a"]);

        let unchanged = chain.clone().replace("missing", tag("y"));
        assert_eq!(unchanged.stage_names(), chain.stage_names());
    }

    #[tokio::test]
    async fn test_without() {
        let chain = TransformChain::compose([tag("a"), tag("b")]).without("a");
        assert_eq!(trail(&chain).await, vec!["b"]);
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let chain = TransformChain::new();
        assert!(chain.is_empty());
        assert!(trail(&chain).await.is_empty());
    }
}
