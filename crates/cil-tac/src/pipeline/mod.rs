//! Compilation pipeline
//!
//! decode -> scopes -> CFG -> fixpoint translation -> composition ->
//! finally inlining -> leave lowering -> verification.

pub mod array_init;
pub mod body_builder;
pub mod finally;
pub mod lower;
pub mod translate;
pub mod verify;

use cil_bytecode::{decode_method, resolve_clauses, EhClause, EhClauseKind, Token};
use crossbeam::channel;
use log::{debug, warn};

use crate::analysis::build_cfg;
use crate::body::{MethodBodyProvider, MethodSource};
use crate::config::CompilerConfig;
use crate::error::{CompileError, Diagnostic, DiagnosticKind};
use crate::ir::{EhScope, MethodTac, ScopeKind, Variables};
use crate::metadata::{MetadataRegistry, MetadataResolver};

pub use body_builder::BodyBuilder;
pub use finally::inline_finally;
pub use lower::lower_leaves;
pub use translate::{translate_block, BlockOutput, TranslationContext};
pub use verify::{verify_method, VerifyError};

/// Compile one method body to three-address code
pub fn compile_method(
    source: &MethodSource,
    resolver: &dyn MetadataResolver,
    registry: &MetadataRegistry,
    config: &CompilerConfig,
) -> Result<MethodTac, CompileError> {
    let name = source.display_name();
    let stream = decode_method(&source.body.code)?;
    let clauses = resolve_clauses(&stream, &source.body.clauses)?;
    debug!("{}: {} instructions, {} exception clauses", name, stream.len(), clauses.len());

    let mut diagnostics = Vec::new();
    let scopes: Vec<EhScope> = clauses
        .iter()
        .map(|clause| scope_of(clause, source, resolver, registry, &mut diagnostics))
        .collect();

    let cfg = build_cfg(&stream, &scopes)?;
    debug!("{}: {} blocks, {} flow roots", name, cfg.block_count(), cfg.roots.len());

    let cx = TranslationContext {
        resolver,
        registry,
        generics: &source.generics,
        return_type: source.return_type(),
        scopes: &scopes,
        inline_array_initializers: config.inline_array_initializers,
    };
    let locals = source.body.locals.iter().map(|t| t.substitute(&source.generics)).collect();
    let vars = Variables::new(locals, source.param_types());

    let mut builder = BodyBuilder::new(&cx, &stream, &cfg, vars, config.max_block_visits);
    builder.converge()?;
    let mut tac = builder.finish(name, &scopes);
    tac.diagnostics.splice(0..0, diagnostics);

    if config.inline_finally {
        let copies = inline_finally(&mut tac);
        debug!("{}: {} finally copies inserted", tac.name, copies);
    }
    if config.lower_leaves {
        let lowered = lower_leaves(&mut tac);
        debug!("{}: {} leaves lowered", tac.name, lowered);
    }
    if config.verify_output {
        verify_method(&tac)?;
    }
    debug!("{}: {} statements", tac.name, tac.len());
    Ok(tac)
}

/// Scope for a resolved clause; catch types go through the registry
fn scope_of(
    clause: &EhClause,
    source: &MethodSource,
    resolver: &dyn MetadataResolver,
    registry: &MetadataRegistry,
    diagnostics: &mut Vec<Diagnostic>,
) -> EhScope {
    let kind = match clause.kind {
        EhClauseKind::Catch(token) => {
            let lookup = registry.resolve_type(resolver, &source.generics, token);
            if !lookup.resolved {
                let d = Diagnostic::new(
                    DiagnosticKind::UnresolvedType,
                    clause.handler_start,
                    format!("catch type token {}", token),
                );
                warn!("{}: {}", source.display_name(), d);
                diagnostics.push(d);
            }
            ScopeKind::Catch(lookup.value)
        }
        EhClauseKind::Filter { filter_start } => ScopeKind::Filter { filter_begin: filter_start },
        EhClauseKind::Finally => ScopeKind::Finally,
        EhClauseKind::Fault => ScopeKind::Fault,
    };
    EhScope::new(kind, clause.try_start..clause.try_end, clause.handler_start..clause.handler_end)
}

fn compile_token(
    provider: &dyn MethodBodyProvider,
    resolver: &dyn MetadataResolver,
    registry: &MetadataRegistry,
    token: Token,
    config: &CompilerConfig,
) -> Result<MethodTac, CompileError> {
    let source = provider.method_source(token)?;
    compile_method(&source, resolver, registry, config)
}

/// Compile many methods on a pool of worker threads.
///
/// Results come back in the order of `tokens`. A failure only affects the
/// method it occurred in; all methods share `registry`.
pub fn compile_methods(
    provider: &dyn MethodBodyProvider,
    resolver: &dyn MetadataResolver,
    registry: &MetadataRegistry,
    tokens: &[Token],
    config: &CompilerConfig,
) -> Vec<Result<MethodTac, CompileError>> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let workers = config.workers().min(tokens.len());
    debug!("compiling {} methods on {} workers", tokens.len(), workers);

    let (job_tx, job_rx) = channel::unbounded::<usize>();
    for i in 0..tokens.len() {
        // The receiver is alive until the pool finishes
        let _ = job_tx.send(i);
    }
    drop(job_tx);

    let (done_tx, done_rx) = channel::unbounded();
    let outcome = crossbeam::scope(|s| {
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            s.spawn(move |_| {
                for i in jobs.iter() {
                    let result = compile_token(provider, resolver, registry, tokens[i], config);
                    if let Err(e) = &result {
                        debug!("method {} failed: {}", tokens[i], e);
                    }
                    if done.send((i, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(done_tx);
    if outcome.is_err() {
        warn!("a compilation worker panicked; its remaining methods are reported as interrupted");
    }

    let mut results: Vec<Option<Result<MethodTac, CompileError>>> = (0..tokens.len()).map(|_| None).collect();
    for (i, result) in done_rx.iter() {
        results[i] = Some(result);
    }
    results
        .into_iter()
        .zip(tokens)
        .map(|(result, &token)| result.unwrap_or(Err(CompileError::Interrupted { token })))
        .collect()
}
