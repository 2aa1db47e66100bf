//! The Action/Continuation stepping engine.
//!
//! A program in flight is a chain of [`Action`] nodes: reified fragments of
//! "what remains to be done", linked leaf-to-root through `parent`
//! references. The [`Continuation`] is the live cursor into that chain. The
//! driver repeatedly takes the cursor's current action and invokes it with
//! the most recently produced value; the action either returns a new value
//! to thread forward, or rewires the cursor and lets the previous value
//! pass through. That two-outcome protocol is the single mechanism behind
//! sequential evaluation, argument evaluation, tail calls, and `call/cc`.
//!
//! Because the chain is explicit data and actions are immutable shareable
//! nodes, capturing a continuation is taking a reference, and reinstating
//! one is rebinding the cursor. Nothing ever unwinds, so a captured
//! continuation can be invoked any number of times, from anywhere. When
//! captures are reused the chain is properly a tree; any single execution
//! only ever walks one path from leaf to root.
//!
//! Native stack depth stays bounded no matter how deep Scheme-level
//! recursion goes: evaluating a subform never calls the evaluator
//! recursively, it pushes actions in front of the cursor instead. A closure
//! applied in tail position replaces the cursor with its body chain whose
//! ultimate parent is the caller's own parent, so iteration runs in
//! constant space.

use std::cell::RefCell;
use std::rc::Rc;

use log::{trace, warn};
use smallvec::SmallVec;

use crate::Error;
use crate::entity::{Closure, Entity, Pair, list_from_slice, list_to_vec};
use crate::env::Environment;
use crate::symbol::Symbol;

/// Evaluated-argument buffer; most combinations are short.
pub type Arguments = SmallVec<[Entity; 4]>;

/// Argument slots shared between the actions that fill them and the action
/// that consumes them. Slot 0 is the operator.
type Slots = Rc<RefCell<Arguments>>;

/// One pending computation step. `parent` is the action to run immediately
/// after this one completes; a `None` parent is the terminal marker.
/// Actions are immutable once constructed, so they are safe to reference
/// from any number of continuations at once.
pub struct Action {
    kind: ActionKind,
    parent: Option<Rc<Action>>,
}

enum ActionKind {
    /// Evaluate a fixed expression in an environment
    Expression { expr: Entity, env: Environment },
    /// Store the incoming value into an argument slot
    ObtainArgument { slots: Slots, index: usize },
    /// All slots filled: apply slot 0 to the rest
    Combine { slots: Slots, env: Environment },
    /// Choose between two expressions on the incoming value
    Branch {
        consequent: Entity,
        alternate: Entity,
        env: Environment,
    },
    /// `set!` the incoming value through an existing binding
    Assign { name: Symbol, env: Environment },
    /// `define` the incoming value in the innermost frame
    Bind { name: Symbol, env: Environment },
    /// `define-syntax`: the incoming value must be a procedure; tag and bind
    BindRewriter { name: Symbol, env: Environment },
    /// Evaluate the incoming (rewritten) form
    Transcribe { env: Environment },
}

/// An immutable snapshot of "the rest of the program", taken from a
/// continuation cursor. First-class: stored in [`Entity::Continuation`] and
/// applicable as a procedure of one argument.
pub struct Capture {
    action: Option<Rc<Action>>,
}

/// The live cursor of "what runs next". Pushing an action allocates a new
/// node in front of the cursor; existing nodes are never mutated, so
/// anything captured earlier stays valid.
pub struct Continuation {
    action: Option<Rc<Action>>,
}

impl Continuation {
    pub fn new() -> Continuation {
        Continuation { action: None }
    }

    /// Schedule evaluation of `expr` in `env` ahead of everything currently
    /// pending.
    pub fn schedule(&mut self, expr: &Entity, env: &Environment) {
        self.push(ActionKind::Expression {
            expr: expr.clone(),
            env: env.clone(),
        });
    }

    /// Package the current cursor as a first-class value.
    pub fn capture(&self) -> Rc<Capture> {
        Rc::new(Capture {
            action: self.action.clone(),
        })
    }

    /// Rebind the cursor to a previously captured chain, abandoning
    /// whatever was in progress here.
    pub fn reinstate(&mut self, capture: &Capture) {
        self.action = capture.action.clone();
    }

    /// True once the terminal marker is reached.
    pub fn is_done(&self) -> bool {
        self.action.is_none()
    }

    /// Number of actions between the cursor and the terminal marker.
    /// Diagnostic; a tail-recursive loop keeps this bounded.
    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut cursor = self.action.clone();
        while let Some(action) = cursor {
            n += 1;
            cursor = action.parent.clone();
        }
        n
    }

    fn push(&mut self, kind: ActionKind) {
        self.action = Some(Rc::new(Action {
            kind,
            parent: self.action.take(),
        }));
    }
}

impl Default for Continuation {
    fn default() -> Self {
        Continuation::new()
    }
}

impl Entity {
    /// Push the work of evaluating this entity onto `cont`.
    ///
    /// Two-outcome contract: `Ok(Some(value))` is this step's result, with
    /// the cursor already advanced; `Ok(None)` means the cursor was rewired
    /// (new actions scheduled) and the previous value threads through.
    pub fn eval(
        &self,
        env: &Environment,
        cont: &mut Continuation,
    ) -> Result<Option<Entity>, Error> {
        match self {
            Entity::Symbol(name) => env.lookup(name).map(Some),
            Entity::Location(location) => Ok(Some(location.get())),
            Entity::Null => Err(Error::InvalidCombination(self.clone())),
            Entity::Pair(form) => eval_combination(form, env, cont),
            _ => Ok(Some(self.clone())),
        }
    }
}

/// Run the single action at the cursor with the last produced value.
/// Returns the value to thread into the next step; with an exhausted
/// cursor, `last` passes through unchanged.
pub fn step(last: Entity, cont: &mut Continuation) -> Result<Entity, Error> {
    let Some(action) = cont.action.clone() else {
        return Ok(last);
    };
    // forward progress by default; handlers below may rewire further
    cont.action = action.parent.clone();

    let outcome = match &action.kind {
        ActionKind::Expression { expr, env } => expr.eval(env, cont)?,
        ActionKind::ObtainArgument { slots, index } => {
            slots.borrow_mut()[*index] = last.clone();
            Some(last.clone())
        }
        ActionKind::Combine { slots, env } => {
            let (operator, args) = {
                let filled = slots.borrow();
                let operator = filled[0].clone();
                let args: Arguments = filled[1..].iter().cloned().collect();
                (operator, args)
            };
            apply_procedure(&operator, args, env, cont)?
        }
        ActionKind::Branch {
            consequent,
            alternate,
            env,
        } => {
            let chosen = if last.is_true() { consequent } else { alternate };
            cont.schedule(chosen, env);
            None
        }
        ActionKind::Assign { name, env } => {
            env.set(name, last.clone())?;
            Some(Entity::Void)
        }
        ActionKind::Bind { name, env } => {
            env.define(name, last.clone());
            Some(Entity::Void)
        }
        ActionKind::BindRewriter { name, env } => match &last {
            Entity::Closure(closure) => {
                env.define(name, Entity::Rewriter(closure.clone()));
                Some(Entity::Void)
            }
            other => return Err(Error::NotApplicable(other.clone())),
        },
        ActionKind::Transcribe { env } => last.eval(env, cont)?,
    };
    Ok(outcome.unwrap_or(last))
}

/// Drive the continuation to its terminal marker and return the final
/// value. Errors abort the loop; the action tree itself is left intact.
pub fn execute(cont: &mut Continuation) -> Result<Entity, Error> {
    let mut value = Entity::Void;
    while !cont.is_done() {
        value = step(value, cont)?;
    }
    Ok(value)
}

/// Evaluate one top-level form to completion. This is the entry point the
/// reader/REPL driver calls once per form.
pub fn eval(expr: &Entity, env: &Environment) -> Result<Entity, Error> {
    let mut cont = Continuation::new();
    cont.schedule(expr, env);
    execute(&mut cont)
}

/// Evaluate a combination `(operator operand...)`.
///
/// An operator symbol naming a syntax primitive gets the unevaluated
/// operands; one naming a rewriter has the whole form transcribed and the
/// result evaluated. Everything else schedules operator and operands for
/// evaluation left to right, with a Combine step at the end.
fn eval_combination(
    form: &Rc<Pair>,
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let whole = Entity::Pair(form.clone());
    let operator = form.car.borrow().clone();
    if let Entity::Symbol(name) = &operator
        && let Some(binding) = env.location_of(name).map(|l| l.get())
    {
        match binding {
            Entity::Primitive(op) if op.is_syntax() => {
                let operands = list_to_vec(&form.cdr.borrow().clone())
                    .ok_or_else(|| Error::InvalidCombination(whole.clone()))?;
                op.arity.validate(operands.len(), &whole)?;
                return op.invoke(&operands, env, cont);
            }
            Entity::Rewriter(rewriter) => {
                cont.push(ActionKind::Transcribe { env: env.clone() });
                let mut form_arg = Arguments::new();
                form_arg.push(whole);
                return apply_closure(&rewriter, form_arg, cont);
            }
            _ => {}
        }
    }

    let elements =
        list_to_vec(&whole).ok_or_else(|| Error::InvalidCombination(whole.clone()))?;
    let slots: Slots = Rc::new(RefCell::new(
        elements.iter().map(|_| Entity::Undefined).collect(),
    ));
    cont.push(ActionKind::Combine {
        slots: slots.clone(),
        env: env.clone(),
    });
    for (index, expr) in elements.into_iter().enumerate().rev() {
        cont.push(ActionKind::ObtainArgument {
            slots: slots.clone(),
            index,
        });
        cont.push(ActionKind::Expression {
            expr,
            env: env.clone(),
        });
    }
    Ok(None)
}

/// Apply a procedure value to already-evaluated arguments.
///
/// Follows the same two-outcome contract as action invocation, so
/// primitives are free to rewire the continuation (this is exactly how
/// `call/cc` and `apply` are written).
pub fn apply_procedure(
    operator: &Entity,
    args: Arguments,
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    match operator {
        Entity::Closure(closure) => apply_closure(closure, args, cont),
        Entity::Primitive(op) if !op.is_syntax() => {
            op.arity.validate(args.len(), operator)?;
            op.invoke(&args, env, cont)
        }
        Entity::Continuation(capture) => {
            match args.len() {
                0 => return Err(Error::TooFewArguments(operator.clone())),
                1 => {}
                _ => return Err(Error::TooManyArguments(operator.clone())),
            }
            trace!("reinstating captured continuation");
            cont.reinstate(capture);
            Ok(Some(args[0].clone()))
        }
        other => Err(Error::NotApplicable(other.clone())),
    }
}

/// Apply a closure: one fresh frame parented to the definition environment
/// (lexical, not dynamic, scoping), arguments bound to formals, body
/// scheduled in tail position relative to the call.
fn apply_closure(
    closure: &Rc<Closure>,
    args: Arguments,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let frame = Environment::with_parent(&closure.env);
    bind_parameters(closure, &frame, &args)?;
    for expr in closure.body.iter().rev() {
        cont.push(ActionKind::Expression {
            expr: expr.clone(),
            env: frame.clone(),
        });
    }
    Ok(None)
}

/// Walk the parameter spec and the evaluated arguments in lockstep.
///
/// Spec shapes: a proper list of symbols (fixed arity), a bare symbol
/// (everything as a rest list), or a list with a dotted rest symbol. A bare
/// rest symbol with no arguments left binds the empty list.
fn bind_parameters(
    closure: &Rc<Closure>,
    frame: &Environment,
    args: &[Entity],
) -> Result<(), Error> {
    let mut spec = closure.params.clone();
    let mut index = 0;
    loop {
        match spec {
            Entity::Pair(slot) => {
                if index >= args.len() {
                    return Err(Error::TooFewArguments(Entity::Closure(closure.clone())));
                }
                match slot.car.borrow().clone() {
                    Entity::Symbol(name) => frame.define(&name, args[index].clone()),
                    other => warn!("apply: formal is not a symbol: {other}"),
                }
                index += 1;
                let next = slot.cdr.borrow().clone();
                spec = next;
            }
            Entity::Symbol(rest) => {
                frame.define(&rest, list_from_slice(&args[index..]));
                return Ok(());
            }
            Entity::Null => {
                if index < args.len() {
                    return Err(Error::TooManyArguments(Entity::Closure(closure.clone())));
                }
                return Ok(());
            }
            other => return Err(Error::InvalidFormal(other)),
        }
    }
}

/// Build a closure: capture the definition environment and run the
/// symbol-resolution caching pass over the body.
///
/// The pass probes through a shadow frame that binds every formal to the
/// `Undefined` sentinel: a body symbol that resolves to a cell currently
/// holding `Undefined` is a parameter awaiting its argument, and its
/// resolution must happen per activation, so the symbol is kept. Anything
/// resolving to a real cell is replaced by the cell itself, and unbound
/// symbols stay symbols (they may be defined by the time the body runs).
fn make_closure(params: &Entity, body: &[Entity], env: &Environment) -> Rc<Closure> {
    let probe = Environment::with_parent(env);
    bind_formals_undefined(params, &probe);
    let body = body.iter().map(|form| optimize(form, &probe)).collect();
    Rc::new(Closure {
        params: params.clone(),
        body,
        env: env.clone(),
    })
}

fn bind_formals_undefined(spec: &Entity, frame: &Environment) {
    let mut spec = spec.clone();
    loop {
        match spec {
            Entity::Pair(slot) => {
                if let Entity::Symbol(name) = &*slot.car.borrow() {
                    frame.define(name, Entity::Undefined);
                }
                let next = slot.cdr.borrow().clone();
                spec = next;
            }
            Entity::Symbol(rest) => {
                frame.define(&rest, Entity::Undefined);
                return;
            }
            _ => return,
        }
    }
}

/// The symbol-resolution caching pass. Replaces a symbol with its storage
/// cell when that is safe; see [`make_closure`] for the parameter rule.
fn optimize(expr: &Entity, env: &Environment) -> Entity {
    match expr {
        Entity::Symbol(name) => match env.location_of(name) {
            None => expr.clone(),
            Some(location) => {
                if matches!(location.get(), Entity::Undefined) {
                    expr.clone()
                } else {
                    Entity::Location(location)
                }
            }
        },
        Entity::Pair(form) => optimize_form(form, env),
        _ => expr.clone(),
    }
}

/// Syntax-aware traversal: quoted data stays raw, binders shield their
/// formals, definition and assignment targets keep their names, rewriter
/// applications are left for transcription to see the original source.
fn optimize_form(form: &Rc<Pair>, env: &Environment) -> Entity {
    let whole = Entity::Pair(form.clone());
    let Some(parts) = list_to_vec(&whole) else {
        // improper combination; evaluation will reject it with context
        return whole;
    };
    if let Some(Entity::Symbol(head)) = parts.first()
        && let Some(binding) = env.location_of(head).map(|l| l.get())
    {
        match binding {
            Entity::Primitive(op) if op.is_syntax() => {
                return optimize_syntax(op.name, &parts, env);
            }
            Entity::Rewriter(_) => return whole,
            _ => {}
        }
    }
    let rebuilt: Vec<Entity> = parts.iter().map(|e| optimize(e, env)).collect();
    list_from_slice(&rebuilt)
}

fn optimize_syntax(name: &str, parts: &[Entity], env: &Environment) -> Entity {
    match name {
        "quote" => list_from_slice(parts),
        "lambda" if parts.len() >= 3 => {
            let probe = Environment::with_parent(env);
            bind_formals_undefined(&parts[1], &probe);
            let mut rebuilt = vec![parts[0].clone(), parts[1].clone()];
            rebuilt.extend(parts[2..].iter().map(|form| optimize(form, &probe)));
            list_from_slice(&rebuilt)
        }
        "define" | "define-syntax" if parts.len() >= 3 => match &parts[1] {
            Entity::Pair(target) => {
                let probe = Environment::with_parent(env);
                bind_formals_undefined(&target.cdr.borrow().clone(), &probe);
                let mut rebuilt = vec![parts[0].clone(), parts[1].clone()];
                rebuilt.extend(parts[2..].iter().map(|form| optimize(form, &probe)));
                list_from_slice(&rebuilt)
            }
            _ => {
                let mut rebuilt = vec![parts[0].clone(), parts[1].clone()];
                rebuilt.extend(parts[2..].iter().map(|form| optimize(form, env)));
                list_from_slice(&rebuilt)
            }
        },
        "set!" if parts.len() >= 3 => {
            let mut rebuilt = vec![parts[0].clone(), parts[1].clone()];
            rebuilt.extend(parts[2..].iter().map(|form| optimize(form, env)));
            list_from_slice(&rebuilt)
        }
        _ => {
            let mut rebuilt = vec![parts[0].clone()];
            rebuilt.extend(parts[1..].iter().map(|form| optimize(form, env)));
            list_from_slice(&rebuilt)
        }
    }
}

//
// Special forms. Registered in the builtinops registry as syntax entries;
// each receives its unevaluated operands, arity already validated.
//

pub(crate) fn eval_quote(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    Ok(Some(args[0].clone()))
}

pub(crate) fn eval_if(
    args: &[Entity],
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let alternate = args.get(2).cloned().unwrap_or(Entity::Void);
    cont.push(ActionKind::Branch {
        consequent: args[1].clone(),
        alternate,
        env: env.clone(),
    });
    cont.schedule(&args[0], env);
    Ok(None)
}

pub(crate) fn eval_define(
    args: &[Entity],
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    match args {
        [Entity::Symbol(name), expr] => {
            cont.push(ActionKind::Bind {
                name: name.clone(),
                env: env.clone(),
            });
            cont.schedule(expr, env);
            Ok(None)
        }
        [Entity::Pair(target), body @ ..] if !body.is_empty() => {
            // (define (name . formals) body...) procedure shorthand
            let name = match target.car.borrow().clone() {
                Entity::Symbol(name) => name,
                other => return Err(Error::InvalidFormal(other)),
            };
            let spec = target.cdr.borrow().clone();
            let closure = make_closure(&spec, body, env);
            env.define(&name, Entity::Closure(closure));
            Ok(Some(Entity::Void))
        }
        [other, _] => Err(Error::InvalidFormal(other.clone())),
        _ => Err(Error::InvalidCombination(list_from_slice(args))),
    }
}

pub(crate) fn eval_set(
    args: &[Entity],
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    match args {
        [Entity::Symbol(name), expr] => {
            cont.push(ActionKind::Assign {
                name: name.clone(),
                env: env.clone(),
            });
            cont.schedule(expr, env);
            Ok(None)
        }
        [other, _] => Err(Error::InvalidFormal(other.clone())),
        _ => Err(Error::InvalidCombination(list_from_slice(args))),
    }
}

pub(crate) fn eval_lambda(
    args: &[Entity],
    env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    Ok(Some(Entity::Closure(make_closure(
        &args[0],
        &args[1..],
        env,
    ))))
}

pub(crate) fn eval_begin(
    args: &[Entity],
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    if args.is_empty() {
        return Ok(Some(Entity::Void));
    }
    for expr in args.iter().rev() {
        cont.schedule(expr, env);
    }
    Ok(None)
}

pub(crate) fn eval_define_syntax(
    args: &[Entity],
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    match args {
        [Entity::Symbol(name), expr] => {
            cont.push(ActionKind::BindRewriter {
                name: name.clone(),
                env: env.clone(),
            });
            cont.schedule(expr, env);
            Ok(None)
        }
        [other, _] => Err(Error::InvalidFormal(other.clone())),
        _ => Err(Error::InvalidCombination(list_from_slice(args))),
    }
}
