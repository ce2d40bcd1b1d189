//! Module-level code generation.
//!
//! `ModuleCodegen` walks the top-level declarations of one translation unit
//! and drives the [`Translator`]. Items run off a worklist: a deferred
//! template body is generated right after the function that declared it, and
//! an item that uses a template before its definition is parked under the
//! template's name and re-run once that template registers.

pub mod expr;
pub mod stmt;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use cranelift_module::Module;
use cranelift_object::ObjectModule;
use tracing::debug;

use crate::ast::{FunctionDefinition, StructDeclaration, Toplevel};
use crate::config::TranslatorConfig;
use crate::diagnostics::TranslateError;
use crate::span::Spanned;
use crate::template::{DeferredSpecialization, PendingUse};
use crate::translator::Translator;
use stmt::StatementCodegen;

pub use expr::ValueCodegen;

/// One unit of work: a top-level item, or the body of a function
/// specialization declared while an earlier job ran.
#[derive(Debug, Clone)]
enum Job {
    Item(Toplevel),
    Specialization(DeferredSpecialization),
}

impl Job {
    fn name(&self) -> &str {
        match self {
            Job::Item(item) => item.name(),
            Job::Specialization(spec) => &spec.symbol.symbol,
        }
    }
}

/// What a completed job left behind for the worklist.
#[derive(Default)]
struct Outcome {
    deferred: Vec<DeferredSpecialization>,
    /// A template that just registered, with the uses that were waiting for it.
    registered: Option<(String, Vec<PendingUse>)>,
}

pub struct ModuleCodegen<M: Module> {
    tr: Translator<M>,
    /// Jobs waiting on a template that is not defined yet, keyed by its name.
    parked: BTreeMap<String, Vec<Job>>,
}

impl ModuleCodegen<ObjectModule> {
    pub fn new(config: &TranslatorConfig, name: &str, file: impl Into<Arc<str>>) -> Result<Self, TranslateError> {
        Ok(Self::with_module(Translator::new(config, name, file)?))
    }
}

impl<M: Module> ModuleCodegen<M> {
    pub fn with_module(tr: Translator<M>) -> Self {
        Self { tr, parked: BTreeMap::new() }
    }

    pub fn translator(&self) -> &Translator<M> {
        &self.tr
    }

    pub fn translator_mut(&mut self) -> &mut Translator<M> {
        &mut self.tr
    }

    /// Generate every declaration in order. Forward uses of templates are
    /// resolved when their definitions appear, here or in a later call.
    pub fn codegen(&mut self, decls: &[Toplevel]) -> Result<(), TranslateError> {
        let queue = decls.iter().cloned().map(Job::Item).collect();
        self.run(queue)
    }

    /// Close the unit. Fails with every template use that never found a
    /// definition.
    pub fn finish_module(mut self) -> Result<Translator<M>, TranslateError> {
        if self.parked.is_empty() && !self.tr.templates().has_pending() {
            return Ok(self.tr);
        }
        let parked: Vec<&str> = self.parked.values().flatten().map(Job::name).collect();
        debug!(?parked, "module finished with parked items");
        let uses = self.tr.take_unresolved();
        if uses.is_empty() {
            return Err(TranslateError::internal(format!("items parked without a pending template use: {}", parked.join(", "))));
        }
        Err(TranslateError::UnresolvedTemplate { uses })
    }

    fn run(&mut self, mut queue: VecDeque<Job>) -> Result<(), TranslateError> {
        while let Some(job) = queue.pop_front() {
            match self.run_job(&job) {
                Ok(outcome) => {
                    for spec in outcome.deferred.into_iter().rev() {
                        queue.push_front(Job::Specialization(spec));
                    }
                    if let Some((name, waiting)) = outcome.registered {
                        self.release(&name, waiting, &mut queue)?;
                    }
                }
                Err(TranslateError::Deferred { pending }) => {
                    // Symbols declared before the deferral still need bodies.
                    for spec in self.tr.take_deferred() {
                        queue.push_back(Job::Specialization(spec));
                    }
                    debug!(item = job.name(), waiting_on = %pending.name, "parking item");
                    self.parked.entry(pending.name).or_default().push(job);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Specialize each key that was waiting on `name` once, then re-queue the
    /// items parked on it.
    fn release(&mut self, name: &str, waiting: Vec<PendingUse>, queue: &mut VecDeque<Job>) -> Result<(), TranslateError> {
        for use_ in waiting {
            match self.tr.specialize_template(&use_.name, &use_.args, use_.pos.span) {
                Ok(_) | Err(TranslateError::Deferred { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        for spec in self.tr.take_deferred() {
            queue.push_back(Job::Specialization(spec));
        }
        if let Some(jobs) = self.parked.remove(name) {
            debug!(template = name, items = jobs.len(), "resuming parked items");
            queue.extend(jobs);
        }
        Ok(())
    }

    fn run_job(&mut self, job: &Job) -> Result<Outcome, TranslateError> {
        match job {
            Job::Item(item) => self.toplevel(item),
            Job::Specialization(spec) => {
                let body = &spec.definition.body;
                let deferred = self.tr.generate_specialization(spec, |f| StatementCodegen::new(f).block(body))?;
                Ok(Outcome { deferred, registered: None })
            }
        }
    }

    fn toplevel(&mut self, item: &Toplevel) -> Result<Outcome, TranslateError> {
        debug!(item = item.name(), "generating top-level item");
        match item {
            Toplevel::TypeDeclaration(decl) => {
                self.tr.declare_opaque(&decl.name.node, decl.name.span)?;
                Ok(Outcome::default())
            }
            Toplevel::StructDeclaration(decl) => {
                self.struct_declaration(decl)?;
                Ok(Outcome::default())
            }
            Toplevel::TemplateStructDeclaration(decl) => {
                let waiting = self.tr.register_struct_template(decl)?;
                Ok(Outcome { deferred: Vec::new(), registered: Some((decl.decl.name.node.clone(), waiting)) })
            }
            Toplevel::FunctionDeclaration(decl) => {
                let ty = self.tr.signature(decl)?;
                self.tr.create_function_prototype(ty, &decl.name.node, decl.name.span)?;
                Ok(Outcome::default())
            }
            Toplevel::FunctionDefinition(def) => {
                let deferred = self.function_definition(def)?;
                Ok(Outcome { deferred, registered: None })
            }
            Toplevel::TemplateFunctionDefinition(def) => {
                let waiting = self.tr.register_function_template(def)?;
                Ok(Outcome { deferred: Vec::new(), registered: Some((def.def.decl.name.node.clone(), waiting)) })
            }
        }
    }

    fn struct_declaration(&mut self, decl: &StructDeclaration) -> Result<(), TranslateError> {
        let name = &decl.name;
        // Fields may point back at the struct being declared.
        self.tr.declare_opaque(&name.node, name.span)?;
        let mut fields = Vec::with_capacity(decl.members.len());
        for member in &decl.members {
            fields.push((member.name.node.clone(), self.tr.resolve_type(&member.ty)?));
        }
        self.tr.create_struct(&name.node, fields, name.span)?;
        Ok(())
    }

    fn function_definition(&mut self, def: &FunctionDefinition) -> Result<Vec<DeferredSpecialization>, TranslateError> {
        let decl = &def.decl;
        let ty = self.tr.signature(decl)?;
        let names: Vec<Spanned<String>> = decl.params.iter().map(|p| p.name.clone()).collect();
        self.tr
            .create_and_start_function(ty, &names, &decl.name.node, decl.name.span, |f| StatementCodegen::new(f).block(&def.body))
    }
}
