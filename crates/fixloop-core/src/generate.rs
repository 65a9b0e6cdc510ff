use crate::extract::{CodeBlock, Extractor};
use anyhow::{Result, bail};
use fixloop_llm::{Coder, GenerateRequest};
use tracing::debug;

/// Asks the coder for code and isolates the payload for the request's task kind.
pub fn generate_block<C>(coder: &C, extractor: &Extractor, request: &GenerateRequest) -> Result<CodeBlock>
where
    C: Coder + ?Sized,
{
    let text = coder.generate(request)?;
    let block = extractor.block(&text, &request.language, request.kind);
    if block.code.trim().is_empty() {
        bail!("model response contained no code");
    }
    debug!(language = %block.language, chars = block.code.len(), "extracted code block");
    Ok(block)
}
