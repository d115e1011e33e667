//! Bytecode compiler transforming the AST into code objects.
//!
//! The compiler walks statements and expressions and emits instructions
//! through `CodeBuilder`. It resolves every name against the active scope's
//! symbol table, keeps a loop-context stack for `break`/`continue`, and
//! checks after each statement that the simulated operand stack is back
//! where it started.

use std::borrow::Cow;

use super::{
    builder::{CodeBuilder, Label},
    code::{Code, Const},
    op::Opcode,
};
use crate::{
    ast::{
        BoolOperator, CmpOperator, Expr, ExprContext, FunctionDef, ImportAlias, Keyword, Literal, Module, Operator,
        Stmt, UnaryOperator,
    },
    symtable::{ScopeId, ScopeMap, SymbolTable, VarScope},
};

/// Maximum number of positional arguments in a call.
///
/// This limit comes from the bytecode format: `CallFunction` carries the
/// argument count in a u8 operand.
const MAX_CALL_ARGS: usize = 255;

/// Operand-stack slots occupied by the iterator state `GetIterStack` sets up.
///
/// `ForIter`'s exit edge tears all of them down; an early `break` has to pop
/// them explicitly.
const ITER_STACK_SLOTS: i32 = 4;

/// Compiles AST nodes to bytecode.
///
/// One instance compiles one module; function definitions recurse by
/// swapping in a fresh `CodeBuilder` and the function scope's symbol table,
/// then emit `MakeFunction` in the enclosing scope.
pub struct Compiler<'a, T> {
    /// Code being built for the current scope.
    code: CodeBuilder,

    /// Symbol tables for every scope, indexed by the ids on the AST.
    scopes: &'a mut ScopeMap<T>,

    /// Scope currently being emitted.
    scope: ScopeId,

    /// Source display name copied into every code object.
    filename: &'a str,

    /// Innermost-last jump targets for `break`/`continue`.
    loop_stack: Vec<LoopCtx>,
}

/// Jump targets and cleanup kind of one active loop.
#[derive(Clone, Copy)]
struct LoopCtx {
    continue_label: Label,
    break_label: Label,
    kind: LoopKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    For,
    While,
}

impl<'a, T: SymbolTable> Compiler<'a, T> {
    fn new(scopes: &'a mut ScopeMap<T>, scope: ScopeId, filename: &'a str) -> Self {
        Self {
            code: CodeBuilder::new(),
            scopes,
            scope,
            filename,
            loop_stack: Vec::new(),
        }
    }

    /// Compiles a module to its top-level code object.
    ///
    /// Nested function code objects end up in the constant pools of their
    /// enclosing scopes.
    pub fn compile_module(module: &Module, scopes: &'a mut ScopeMap<T>, filename: &'a str) -> Result<Code, CompileError> {
        let mut compiler = Compiler::new(scopes, module.scope, filename);
        compiler.compile_suite(&module.body)?;
        compiler.code.emit(Opcode::LoadConstNone);
        compiler.code.emit(Opcode::ReturnValue);

        let mut code = compiler.code.build();
        code.name = "<module>".into();
        code.filename = filename.into();
        Ok(code)
    }

    /// Compiles a suite of statements.
    ///
    /// Returns the last statement so function bodies can decide whether an
    /// implicit return is needed.
    ///
    /// # Panics
    ///
    /// Panics if a statement leaves a net operand-stack effect; that is a
    /// compiler bug, not a caller error.
    fn compile_suite<'s>(&mut self, suite: &'s [Stmt]) -> Result<Option<&'s Stmt>, CompileError> {
        let mut last = None;
        for stmt in suite {
            let depth = self.code.stack_depth();
            self.compile_stmt(stmt)?;
            assert_eq!(
                self.code.stack_depth(),
                depth,
                "statement must have zero net stack effect"
            );
            last = Some(stmt);
        }
        Ok(last)
    }

    // ========================================================================
    // Statement Compilation
    // ========================================================================

    /// Compiles a single statement.
    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.code.emit(Opcode::PopTop); // Discard the value
            }

            Stmt::Pass => {}

            Stmt::Return(value) => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.code.emit(Opcode::LoadConstNone),
                }
                self.code.emit(Opcode::ReturnValue);
            }

            Stmt::Assign { targets, value } => {
                self.compile_expr(value)?;
                let (final_target, rest) = targets
                    .split_last()
                    .ok_or_else(|| CompileError::new("assignment without targets"))?;
                for target in rest {
                    self.code.emit(Opcode::DupTop);
                    self.compile_store(target)?;
                }
                self.compile_store(final_target)?;
            }

            Stmt::AugAssign { target, op, value } => {
                self.compile_target(target, ExprContext::Load)?;
                self.compile_expr(value)?;
                self.code.emit(inplace_opcode(*op));
                self.compile_store(target)?;
            }

            Stmt::If { test, body, orelse } => self.compile_if(test, body, orelse)?,

            Stmt::While { test, body, orelse } => self.compile_while(test, body, orelse)?,

            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => self.compile_for(target, iter, body, orelse)?,

            Stmt::Break => self.compile_break()?,

            Stmt::Continue => {
                let ctx = self.innermost_loop("'continue' outside loop")?;
                self.code.jump(Opcode::Jump, ctx.continue_label);
            }

            Stmt::FunctionDef(func) => self.compile_function_def(func)?,

            Stmt::Import { names } => self.compile_import(names)?,

            Stmt::ImportFrom { module, names, level } => {
                self.compile_import_from(module.as_deref(), names, *level)?;
            }
        }
        Ok(())
    }

    /// Compiles an if statement.
    fn compile_if(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<(), CompileError> {
        self.compile_expr(test)?;
        let join_l = self.code.get_label();
        if orelse.is_empty() {
            self.code.jump(Opcode::PopJumpIfFalse, join_l);
            self.compile_suite(body)?;
        } else {
            let else_l = self.code.get_label();
            self.code.jump(Opcode::PopJumpIfFalse, else_l);
            self.compile_suite(body)?;
            self.code.jump(Opcode::Jump, join_l);
            self.code.put_label(else_l);
            self.compile_suite(orelse)?;
        }
        self.code.put_label(join_l);
        Ok(())
    }

    /// Compiles a while loop with the test emitted after the body.
    fn compile_while(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<(), CompileError> {
        let test_l = self.code.get_label();
        let body_l = self.code.get_label();
        let end_l = self.code.get_label();

        self.code.jump(Opcode::Jump, test_l);
        self.code.put_label(body_l);
        self.loop_stack.push(LoopCtx {
            continue_label: test_l,
            break_label: end_l,
            kind: LoopKind::While,
        });
        self.compile_suite(body)?;
        self.loop_stack.pop();
        self.code.put_label(test_l);
        self.compile_expr(test)?;
        self.code.jump(Opcode::PopJumpIfTrue, body_l);
        // Runs only when the test falsifies normally; break jumps past it.
        self.compile_suite(orelse)?;
        self.code.put_label(end_l);
        Ok(())
    }

    /// Compiles a for loop over the VM's inline iterator state.
    fn compile_for(&mut self, target: &Expr, iter: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<(), CompileError> {
        let test_l = self.code.get_label();
        let end_l = self.code.get_label();

        self.compile_expr(iter)?;
        self.code.emit(Opcode::GetIterStack);
        self.code.put_label(test_l);
        self.code.jump(Opcode::ForIter, end_l);
        self.compile_store(target)?;
        self.loop_stack.push(LoopCtx {
            continue_label: test_l,
            break_label: end_l,
            kind: LoopKind::For,
        });
        self.compile_suite(body)?;
        self.loop_stack.pop();
        self.code.jump(Opcode::Jump, test_l);
        self.code.put_label(end_l);
        // ForIter's exit edge tears down the iterator state slots.
        self.code.adjust_stack_depth(-ITER_STACK_SLOTS);
        self.compile_suite(orelse)?;
        Ok(())
    }

    /// Compiles a break, popping a for-loop's iterator state first.
    fn compile_break(&mut self) -> Result<(), CompileError> {
        let ctx = self.innermost_loop("'break' outside loop")?;
        if ctx.kind == LoopKind::For {
            // The pops run at runtime only; the tracked depth must end up
            // where natural loop exit leaves it.
            let depth = self.code.stack_depth();
            for _ in 0..ITER_STACK_SLOTS {
                self.code.emit(Opcode::PopTop);
            }
            self.code.set_stack_depth(depth);
        }
        self.code.jump(Opcode::Jump, ctx.break_label);
        Ok(())
    }

    fn innermost_loop(&self, outside_msg: &'static str) -> Result<LoopCtx, CompileError> {
        self.loop_stack.last().copied().ok_or_else(|| CompileError::new(outside_msg))
    }

    /// Compiles a function definition.
    ///
    /// The body is emitted into a fresh builder under the function's own
    /// (finalized) symbol table; the enclosing scope then gets
    /// `MakeFunction` plus a definitional store of the function's name.
    fn compile_function_def(&mut self, func: &FunctionDef) -> Result<(), CompileError> {
        let params = &func.params;
        if params.vararg.is_some() || params.kwarg.is_some() {
            return Err(CompileError::new(format!(
                "function '{}': variadic parameters are not supported",
                func.name
            )));
        }
        if !params.kwonlyargs.is_empty() || !params.kw_defaults.is_empty() {
            return Err(CompileError::new(format!(
                "function '{}': keyword-only parameters are not supported",
                func.name
            )));
        }
        if !params.defaults.is_empty() {
            return Err(CompileError::new(format!(
                "function '{}': parameter defaults are not supported",
                func.name
            )));
        }

        let prev_scope = self.scope;
        let prev_code = std::mem::take(&mut self.code);
        self.scope = func.scope;
        self.scopes.get_mut(func.scope).finalize();

        // Parameter names go at the head of the constant pool, in
        // declaration order, so the VM can bind calls by keyword.
        for param in &params.args {
            self.code.intern_name(param);
        }

        let last = self.compile_suite(&func.body)?;
        if !matches!(last, Some(Stmt::Return(_))) {
            self.code.emit(Opcode::LoadConstNone);
            self.code.emit(Opcode::ReturnValue);
        }

        let mut code = std::mem::replace(&mut self.code, prev_code).build();
        code.name = func.name.as_str().into();
        code.filename = self.filename.into();
        code.argcount = u16::try_from(params.args.len()).expect("parameter count exceeds u16");
        // The VM frame keeps locals below the operand stack, so reserve
        // space for both.
        code.stacksize += self.scopes.get(func.scope).num_locals();
        self.scope = prev_scope;

        self.code.emit_const(Opcode::MakeFunction, Const::Code(Box::new(code)));
        self.emit_var(&func.name, ExprContext::StoreConst)
    }

    /// Compiles `import a.b.c [as x]` clauses.
    fn compile_import(&mut self, names: &[ImportAlias]) -> Result<(), CompileError> {
        for alias in names {
            self.code.load_int(0); // import level
            self.code.emit(Opcode::LoadConstNone); // fromlist
            self.code.emit_name(Opcode::ImportName, &alias.name);
            if let Some(asname) = &alias.asname {
                // The import pushes the top-level package; walk down to the
                // submodule the alias binds.
                for component in alias.name.split('.').skip(1) {
                    self.code.emit_name(Opcode::LoadAttr, component);
                }
                self.emit_var(asname, ExprContext::StoreConst)?;
            } else {
                let top = alias.name.split_once('.').map_or(alias.name.as_str(), |(head, _)| head);
                self.emit_var(top, ExprContext::StoreConst)?;
            }
        }
        Ok(())
    }

    /// Compiles `from module import ...`.
    fn compile_import_from(
        &mut self,
        module: Option<&str>,
        names: &[ImportAlias],
        level: u32,
    ) -> Result<(), CompileError> {
        self.code.load_int(i64::from(level));
        for alias in names {
            self.code.emit_name(Opcode::LoadConstString, &alias.name);
        }
        let count = u16::try_from(names.len()).expect("import name count exceeds u16");
        self.code.emit_u16(Opcode::BuildTuple, count);
        self.code.emit_name(Opcode::ImportName, module.unwrap_or(""));

        if let [alias] = names {
            if alias.name == "*" {
                self.code.emit(Opcode::ImportStar);
                return Ok(());
            }
        }
        for alias in names {
            self.code.emit_name(Opcode::ImportFrom, &alias.name);
            self.emit_var(alias.asname.as_deref().unwrap_or(&alias.name), ExprContext::StoreConst)?;
        }
        self.code.emit(Opcode::PopTop); // Discard the module
        Ok(())
    }

    // ========================================================================
    // Expression Compilation
    // ========================================================================

    /// Compiles an expression, leaving its value on the stack.
    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Name { id, ctx } => self.emit_var(id, *ctx)?,

            Expr::Attribute { ctx, .. } => self.compile_target(expr, *ctx)?,

            Expr::Literal(literal) => self.compile_literal(literal),

            Expr::Tuple(elements) => self.compile_elements(elements, Opcode::BuildTuple)?,

            Expr::List(elements) => self.compile_elements(elements, Opcode::BuildList)?,

            Expr::Set(elements) => self.compile_elements(elements, Opcode::BuildSet)?,

            Expr::Dict(pairs) => {
                let count = u16::try_from(pairs.len()).expect("dict literal length exceeds u16");
                self.code.emit_u16(Opcode::BuildMap, count);
                for (key, value) in pairs {
                    // The VM pops the key first, then the value.
                    self.compile_expr(value)?;
                    self.compile_expr(key)?;
                    self.code.emit(Opcode::StoreMap);
                }
            }

            Expr::Call { func, args, keywords } => self.compile_call(func, args, keywords)?,

            Expr::BinOp { left, op, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.code.emit(binary_opcode(*op));
            }

            Expr::UnaryOp { op, operand } => {
                self.compile_expr(operand)?;
                self.code.emit(unary_opcode(*op));
            }

            Expr::BoolOp { op, values } => self.compile_bool_op(*op, values)?,

            Expr::Compare {
                left,
                ops,
                comparators,
            } => self.compile_compare(left, ops, comparators)?,
        }
        Ok(())
    }

    /// Compiles a literal value.
    fn compile_literal(&mut self, literal: &Literal) {
        match literal {
            Literal::None => self.code.emit(Opcode::LoadConstNone),
            Literal::Int(n) => self.code.load_int(*n),
            Literal::Str(s) => self.code.emit_const(Opcode::LoadConstObj, Const::Str(s.as_str().into())),
            Literal::Bytes(b) => self.code.emit_const(Opcode::LoadConstObj, Const::Bytes(b.as_slice().into())),
        }
    }

    /// Compiles container elements followed by the build opcode.
    fn compile_elements(&mut self, elements: &[Expr], build: Opcode) -> Result<(), CompileError> {
        for element in elements {
            self.compile_expr(element)?;
        }
        let count = u16::try_from(elements.len()).expect("container literal length exceeds u16");
        self.code.emit_u16(build, count);
        Ok(())
    }

    /// Compiles a call; only positional arguments are accepted.
    fn compile_call(&mut self, func: &Expr, args: &[Expr], keywords: &[Keyword]) -> Result<(), CompileError> {
        if !keywords.is_empty() {
            return Err(CompileError::new("call with keyword arguments is not supported"));
        }
        if args.len() > MAX_CALL_ARGS {
            return Err(CompileError::new(format!(
                "more than {MAX_CALL_ARGS} positional arguments in function call"
            )));
        }
        self.compile_expr(func)?;
        for arg in args {
            self.compile_expr(arg)?;
        }
        self.code
            .emit_call_function(u8::try_from(args.len()).expect("checked above"));
        Ok(())
    }

    /// Compiles short-circuit `and`/`or`.
    fn compile_bool_op(&mut self, op: BoolOperator, values: &[Expr]) -> Result<(), CompileError> {
        let jump_op = match op {
            BoolOperator::And => Opcode::JumpIfFalseOrPop,
            BoolOperator::Or => Opcode::JumpIfTrueOrPop,
        };
        let join_l = self.code.get_label();
        let (last, rest) = values
            .split_last()
            .ok_or_else(|| CompileError::new("boolean operation without operands"))?;
        for value in rest {
            self.compile_expr(value)?;
            self.code.jump(jump_op, join_l);
        }
        self.compile_expr(last)?;
        self.code.put_label(join_l);
        Ok(())
    }

    /// Compiles a single-operator comparison.
    fn compile_compare(&mut self, left: &Expr, ops: &[CmpOperator], comparators: &[Expr]) -> Result<(), CompileError> {
        if ops.len() != 1 || comparators.len() != 1 {
            return Err(CompileError::new("chained comparison is not supported"));
        }
        self.compile_expr(left)?;
        self.compile_expr(&comparators[0])?;
        let op = ops[0];
        self.code.emit(compare_opcode(op));
        // The VM only has the positive tests; negate the inverted forms.
        if matches!(op, CmpOperator::IsNot | CmpOperator::NotIn) {
            self.code.emit(Opcode::UnaryNot);
        }
        Ok(())
    }

    // ========================================================================
    // Variable Operations
    // ========================================================================

    /// Emits a store matching the target's own context tag.
    ///
    /// Strict-mode front ends tag module-level bindings `StoreConst`; plain
    /// targets carry `Store`.
    fn compile_store(&mut self, target: &Expr) -> Result<(), CompileError> {
        let ctx = match target {
            Expr::Name { ctx, .. } | Expr::Attribute { ctx, .. } => *ctx,
            _ => ExprContext::Store,
        };
        self.compile_target(target, ctx)
    }

    /// Emits a name or attribute access in an explicitly given context.
    ///
    /// Augmented assignment reads its target through here with
    /// `ExprContext::Load`, overriding the node's store tag; the node itself
    /// is never modified.
    fn compile_target(&mut self, target: &Expr, ctx: ExprContext) -> Result<(), CompileError> {
        match target {
            Expr::Name { id, .. } => self.emit_var(id, ctx),
            Expr::Attribute { value, attr, .. } => {
                self.compile_expr(value)?;
                let op = match ctx {
                    ExprContext::Load => Opcode::LoadAttr,
                    // Attributes have no const-store flavor.
                    ExprContext::Store | ExprContext::StoreConst => Opcode::StoreAttr,
                };
                self.code.emit_name(op, attr);
                Ok(())
            }
            _ => Err(CompileError::new("assignment target must be a name or attribute")),
        }
    }

    /// Emits the load/store for `name` using the opcode family its resolved
    /// scope calls for.
    fn emit_var(&mut self, name: &str, ctx: ExprContext) -> Result<(), CompileError> {
        let symtab = self.scopes.get(self.scope);
        let Some(scope) = symtab.get_scope(name) else {
            return Err(CompileError::new(format!(
                "name '{name}' is missing from the scope's symbol table"
            )));
        };
        let op = match (ctx, scope) {
            (ExprContext::Load, VarScope::Name) => Opcode::LoadName,
            (ExprContext::Load, VarScope::Global) => Opcode::LoadGlobal,
            (ExprContext::Load, VarScope::Fast) => Opcode::LoadFastN,
            (ExprContext::Load, VarScope::Deref) => Opcode::LoadDeref,
            (ExprContext::Store, VarScope::Name) => Opcode::StoreName,
            (ExprContext::Store, VarScope::Global) => Opcode::StoreGlobal,
            (ExprContext::StoreConst, VarScope::Name) => Opcode::StoreNameConst,
            (ExprContext::StoreConst, VarScope::Global) => Opcode::StoreGlobalConst,
            // Fast slots and cells have no const-store flavor.
            (ExprContext::Store | ExprContext::StoreConst, VarScope::Fast) => Opcode::StoreFastN,
            (ExprContext::Store | ExprContext::StoreConst, VarScope::Deref) => Opcode::StoreDeref,
        };
        if matches!(scope, VarScope::Fast | VarScope::Deref) {
            let Some(slot) = symtab.get_fast_local(name) else {
                return Err(CompileError::new(format!(
                    "name '{name}' has no fast slot in the scope's symbol table"
                )));
            };
            self.code.emit_u16(op, slot);
        } else {
            self.code.emit_name(op, name);
        }
        Ok(())
    }
}

/// Error produced when the AST uses a construct outside the compiled subset
/// or the symbol table disagrees with the tree.
///
/// Internal invariant violations (stack imbalance, unbound labels at
/// finalization, operand overflow) are compiler bugs and panic instead, so
/// the two kinds stay distinguishable.
#[derive(Debug, Clone)]
pub struct CompileError {
    message: Cow<'static, str>,
}

impl CompileError {
    fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CompileError {}

// ============================================================================
// Operator Mapping Functions
// ============================================================================

/// Maps a binary operator to its opcode.
fn binary_opcode(op: Operator) -> Opcode {
    match op {
        Operator::Add => Opcode::BinaryAdd,
        Operator::Sub => Opcode::BinarySubtract,
        Operator::Mult => Opcode::BinaryMultiply,
        Operator::MatMult => Opcode::BinaryMatMultiply,
        Operator::Div => Opcode::BinaryTrueDivide,
        Operator::FloorDiv => Opcode::BinaryFloorDivide,
        Operator::Mod => Opcode::BinaryModulo,
        Operator::Pow => Opcode::BinaryPower,
        Operator::LShift => Opcode::BinaryLShift,
        Operator::RShift => Opcode::BinaryRShift,
        Operator::BitOr => Opcode::BinaryOr,
        Operator::BitXor => Opcode::BinaryXor,
        Operator::BitAnd => Opcode::BinaryAnd,
    }
}

/// Maps an operator to its in-place (augmented assignment) opcode.
fn inplace_opcode(op: Operator) -> Opcode {
    match op {
        Operator::Add => Opcode::InplaceAdd,
        Operator::Sub => Opcode::InplaceSubtract,
        Operator::Mult => Opcode::InplaceMultiply,
        Operator::MatMult => Opcode::InplaceMatMultiply,
        Operator::Div => Opcode::InplaceTrueDivide,
        Operator::FloorDiv => Opcode::InplaceFloorDivide,
        Operator::Mod => Opcode::InplaceModulo,
        Operator::Pow => Opcode::InplacePower,
        Operator::LShift => Opcode::InplaceLShift,
        Operator::RShift => Opcode::InplaceRShift,
        Operator::BitOr => Opcode::InplaceOr,
        Operator::BitXor => Opcode::InplaceXor,
        Operator::BitAnd => Opcode::InplaceAnd,
    }
}

/// Maps a unary operator to its opcode.
fn unary_opcode(op: UnaryOperator) -> Opcode {
    match op {
        UnaryOperator::UAdd => Opcode::UnaryPositive,
        UnaryOperator::USub => Opcode::UnaryNegative,
        UnaryOperator::Invert => Opcode::UnaryInvert,
        UnaryOperator::Not => Opcode::UnaryNot,
    }
}

/// Maps a comparison operator to its opcode.
///
/// `IsNot` and `NotIn` share the positive opcode; the caller appends
/// `UnaryNot`.
fn compare_opcode(op: CmpOperator) -> Opcode {
    match op {
        CmpOperator::Eq => Opcode::BinaryEqual,
        CmpOperator::NotEq => Opcode::BinaryNotEqual,
        CmpOperator::Lt => Opcode::BinaryLess,
        CmpOperator::LtE => Opcode::BinaryLessEqual,
        CmpOperator::Gt => Opcode::BinaryMore,
        CmpOperator::GtE => Opcode::BinaryMoreEqual,
        CmpOperator::Is | CmpOperator::IsNot => Opcode::BinaryIs,
        CmpOperator::In | CmpOperator::NotIn => Opcode::BinaryIn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::Parameters, symtable::StaticSymbolTable};

    /// A module scope where every listed name resolves to `Name`.
    fn name_scope(names: &[&str]) -> (ScopeMap<StaticSymbolTable>, ScopeId) {
        let mut scopes = ScopeMap::new();
        let mut table = StaticSymbolTable::new();
        for name in names {
            table.define(name, VarScope::Name);
        }
        let scope = scopes.insert(table);
        (scopes, scope)
    }

    fn name(id: &str, ctx: ExprContext) -> Expr {
        Expr::Name {
            id: id.to_owned(),
            ctx,
        }
    }

    fn int(n: i64) -> Expr {
        Expr::Literal(Literal::Int(n))
    }

    fn compile(body: Vec<Stmt>, scopes: &mut ScopeMap<StaticSymbolTable>, scope: ScopeId) -> Code {
        let module = Module { body, scope };
        Compiler::compile_module(&module, scopes, "<test>").expect("module should compile")
    }

    #[test]
    fn test_const_assignment() {
        // x = 1, with a strict-mode const store on the target
        let (mut scopes, scope) = name_scope(&["x"]);
        let code = compile(
            vec![Stmt::Assign {
                targets: vec![name("x", ExprContext::StoreConst)],
                value: int(1),
            }],
            &mut scopes,
            scope,
        );

        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadConstSmallInt as u8,
                1,
                0,
                0,
                0,
                Opcode::StoreNameConst as u8,
                0,
                0,
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );
        assert_eq!(code.constants(), &[Const::Str("x".into())]);
        assert!(code.stacksize >= 1);
        assert_eq!(&*code.name, "<module>");
    }

    #[test]
    fn test_chained_assignment_dups_value() {
        // a = b = 2
        let (mut scopes, scope) = name_scope(&["a", "b"]);
        let code = compile(
            vec![Stmt::Assign {
                targets: vec![name("a", ExprContext::StoreConst), name("b", ExprContext::StoreConst)],
                value: int(2),
            }],
            &mut scopes,
            scope,
        );

        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadConstSmallInt as u8,
                2,
                0,
                0,
                0,
                Opcode::DupTop as u8,
                Opcode::StoreNameConst as u8,
                0,
                0,
                Opcode::StoreNameConst as u8,
                1,
                0,
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn test_for_loop_layout() {
        // for i in r: pass
        let (mut scopes, scope) = name_scope(&["i", "r"]);
        let code = compile(
            vec![Stmt::For {
                target: name("i", ExprContext::Store),
                iter: name("r", ExprContext::Load),
                body: vec![Stmt::Pass],
                orelse: vec![],
            }],
            &mut scopes,
            scope,
        );

        let back = (-9i16).to_le_bytes();
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadName as u8,
                0,
                0, // "r"
                Opcode::GetIterStack as u8,
                Opcode::ForIter as u8,
                6,
                0, // exit to offset 13
                Opcode::StoreName as u8,
                1,
                0, // "i"
                Opcode::Jump as u8,
                back[0],
                back[1], // back to the ForIter at offset 4
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );
        // Iterable plus the 4-slot iterator state plus the iteration value.
        assert!(code.stacksize >= 5);
    }

    #[test]
    fn test_if_without_else() {
        // if a: b
        let (mut scopes, scope) = name_scope(&["a", "b"]);
        let code = compile(
            vec![Stmt::If {
                test: name("a", ExprContext::Load),
                body: vec![Stmt::Expr(name("b", ExprContext::Load))],
                orelse: vec![],
            }],
            &mut scopes,
            scope,
        );

        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadName as u8,
                0,
                0,
                Opcode::PopJumpIfFalse as u8,
                4,
                0,
                Opcode::LoadName as u8,
                1,
                0,
                Opcode::PopTop as u8,
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn test_function_def() {
        // def f(x): return x
        let mut scopes = ScopeMap::new();
        let mut module_table = StaticSymbolTable::new();
        module_table.define("f", VarScope::Name);
        let module_scope = scopes.insert(module_table);
        let mut func_table = StaticSymbolTable::new();
        func_table.define_local("x", VarScope::Fast, 0);
        let func_scope = scopes.insert(func_table);

        let code = compile(
            vec![Stmt::FunctionDef(FunctionDef {
                name: "f".to_owned(),
                params: Parameters::positional(vec!["x".to_owned()]),
                body: vec![Stmt::Return(Some(name("x", ExprContext::Load)))],
                scope: func_scope,
            })],
            &mut scopes,
            module_scope,
        );

        assert_eq!(
            code.bytecode(),
            &[
                Opcode::MakeFunction as u8,
                0,
                0,
                Opcode::StoreNameConst as u8,
                1,
                0, // "f"
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );

        let Const::Code(func) = &code.constants()[0] else {
            panic!("first module constant must be the function's code object");
        };
        assert_eq!(&*func.name, "f");
        assert_eq!(&*func.filename, "<test>");
        assert_eq!(func.argcount, 1);
        // Parameter atom first, then nothing else.
        assert_eq!(func.constants(), &[Const::Str("x".into())]);
        assert_eq!(
            func.bytecode(),
            &[Opcode::LoadFastN as u8, 0, 0, Opcode::ReturnValue as u8]
        );
        // One operand slot plus one fast local.
        assert_eq!(func.stacksize, 2);
    }

    #[test]
    fn test_import_star() {
        // from m import *
        let (mut scopes, scope) = name_scope(&[]);
        let code = compile(
            vec![Stmt::ImportFrom {
                module: Some("m".to_owned()),
                names: vec![ImportAlias {
                    name: "*".to_owned(),
                    asname: None,
                }],
                level: 0,
            }],
            &mut scopes,
            scope,
        );

        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadConstSmallInt as u8,
                0,
                0,
                0,
                0,
                Opcode::LoadConstString as u8,
                0,
                0, // "*"
                Opcode::BuildTuple as u8,
                1,
                0,
                Opcode::ImportName as u8,
                1,
                0, // "m"
                Opcode::ImportStar as u8,
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn test_break_in_for_pops_iterator_state() {
        // for i in r: break
        let (mut scopes, scope) = name_scope(&["i", "r"]);
        let code = compile(
            vec![Stmt::For {
                target: name("i", ExprContext::Store),
                iter: name("r", ExprContext::Load),
                body: vec![Stmt::Break],
                orelse: vec![],
            }],
            &mut scopes,
            scope,
        );

        let pops = code
            .bytecode()
            .iter()
            .filter(|&&byte| byte == Opcode::PopTop as u8)
            .count();
        assert_eq!(pops, 4, "for-loop break must pop the iterator state");
    }

    #[test]
    fn test_break_in_while_pops_nothing() {
        // while a: break
        let (mut scopes, scope) = name_scope(&["a"]);
        let code = compile(
            vec![Stmt::While {
                test: name("a", ExprContext::Load),
                body: vec![Stmt::Break],
                orelse: vec![],
            }],
            &mut scopes,
            scope,
        );

        let pops = code
            .bytecode()
            .iter()
            .filter(|&&byte| byte == Opcode::PopTop as u8)
            .count();
        assert_eq!(pops, 0);
    }

    #[test]
    fn test_aug_assign_reads_then_stores() {
        // x += 1
        let (mut scopes, scope) = name_scope(&["x"]);
        let code = compile(
            vec![Stmt::AugAssign {
                target: name("x", ExprContext::Store),
                op: Operator::Add,
                value: int(1),
            }],
            &mut scopes,
            scope,
        );

        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadName as u8,
                0,
                0,
                Opcode::LoadConstSmallInt as u8,
                1,
                0,
                0,
                0,
                Opcode::InplaceAdd as u8,
                Opcode::StoreName as u8,
                0,
                0,
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn test_is_not_appends_unary_not() {
        // a is not b
        let (mut scopes, scope) = name_scope(&["a", "b"]);
        let code = compile(
            vec![Stmt::Expr(Expr::Compare {
                left: Box::new(name("a", ExprContext::Load)),
                ops: vec![CmpOperator::IsNot],
                comparators: vec![name("b", ExprContext::Load)],
            })],
            &mut scopes,
            scope,
        );

        assert_eq!(
            code.bytecode(),
            &[
                Opcode::LoadName as u8,
                0,
                0,
                Opcode::LoadName as u8,
                1,
                0,
                Opcode::BinaryIs as u8,
                Opcode::UnaryNot as u8,
                Opcode::PopTop as u8,
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn test_dict_stores_value_then_key() {
        // {a: b}
        let (mut scopes, scope) = name_scope(&["a", "b"]);
        let code = compile(
            vec![Stmt::Expr(Expr::Dict(vec![(
                name("a", ExprContext::Load),
                name("b", ExprContext::Load),
            )]))],
            &mut scopes,
            scope,
        );

        assert_eq!(
            code.bytecode(),
            &[
                Opcode::BuildMap as u8,
                1,
                0,
                Opcode::LoadName as u8,
                1,
                0, // value "b" first
                Opcode::LoadName as u8,
                0,
                0, // then key "a"
                Opcode::StoreMap as u8,
                Opcode::PopTop as u8,
                Opcode::LoadConstNone as u8,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn test_string_literals_share_pool_slot() {
        let (mut scopes, scope) = name_scope(&[]);
        let code = compile(
            vec![
                Stmt::Expr(Expr::Literal(Literal::Str("dup".to_owned()))),
                Stmt::Expr(Expr::Literal(Literal::Str("dup".to_owned()))),
            ],
            &mut scopes,
            scope,
        );
        assert_eq!(code.constants(), &[Const::Str("dup".into())]);
    }

    #[test]
    fn test_keyword_call_rejected() {
        let (mut scopes, scope) = name_scope(&["f"]);
        let module = Module {
            body: vec![Stmt::Expr(Expr::Call {
                func: Box::new(name("f", ExprContext::Load)),
                args: vec![],
                keywords: vec![Keyword {
                    arg: "k".to_owned(),
                    value: int(1),
                }],
            })],
            scope,
        };
        let err = Compiler::compile_module(&module, &mut scopes, "<test>").unwrap_err();
        assert!(err.message().contains("keyword arguments"), "got: {err}");
    }

    #[test]
    fn test_chained_comparison_rejected() {
        let (mut scopes, scope) = name_scope(&["a", "b", "c"]);
        let module = Module {
            body: vec![Stmt::Expr(Expr::Compare {
                left: Box::new(name("a", ExprContext::Load)),
                ops: vec![CmpOperator::Lt, CmpOperator::Lt],
                comparators: vec![name("b", ExprContext::Load), name("c", ExprContext::Load)],
            })],
            scope,
        };
        let err = Compiler::compile_module(&module, &mut scopes, "<test>").unwrap_err();
        assert!(err.message().contains("chained comparison"), "got: {err}");
    }

    #[test]
    fn test_vararg_function_rejected() {
        let mut scopes = ScopeMap::new();
        let mut module_table = StaticSymbolTable::new();
        module_table.define("f", VarScope::Name);
        let module_scope = scopes.insert(module_table);
        let func_scope = scopes.insert(StaticSymbolTable::new());

        let module = Module {
            body: vec![Stmt::FunctionDef(FunctionDef {
                name: "f".to_owned(),
                params: Parameters {
                    vararg: Some("args".to_owned()),
                    ..Parameters::default()
                },
                body: vec![Stmt::Pass],
                scope: func_scope,
            })],
            scope: module_scope,
        };
        let err = Compiler::compile_module(&module, &mut scopes, "<test>").unwrap_err();
        assert!(err.message().contains("variadic"), "got: {err}");
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let (mut scopes, scope) = name_scope(&[]);
        let module = Module {
            body: vec![Stmt::Break],
            scope,
        };
        let err = Compiler::compile_module(&module, &mut scopes, "<test>").unwrap_err();
        assert!(err.message().contains("outside loop"), "got: {err}");
    }

    #[test]
    fn test_unknown_name_rejected() {
        let (mut scopes, scope) = name_scope(&[]);
        let module = Module {
            body: vec![Stmt::Expr(name("ghost", ExprContext::Load))],
            scope,
        };
        let err = Compiler::compile_module(&module, &mut scopes, "<test>").unwrap_err();
        assert!(err.message().contains("ghost"), "got: {err}");
    }
}
