//! Semantic analysis: scope resolution, type-checking and module import
//! (§4.5).
//!
//! Grounded in `examples/original_source/lang/frontend/semantics/SemanticAnalyzer.cpp`:
//! same `pushscope`/`popscope`/linear-scan-from-the-end `lookup`, same error
//! message bodies (`"Function '{}': ..."`, `"use of undefined symbol '{}'"`,
//! `"argument {}: expected type {}, got {}"`). Two differences from that
//! reference, both noted in `DESIGN.md`:
//!
//!  - the AST here (`tea_parser::ast`) has no mutable `type` field to stash
//!    a resolved type on — this pass is a pure read + diagnose, and
//!    `tea_ir::codegen` independently resolves types again while lowering.
//!  - `scope.lookup` here walks a `Vec<Vec<Symbol>>` back-to-front instead
//!    of the reference's scope-history iterator dance; same semantics
//!    (most-recently-pushed frame wins), plainer Rust.

use hashbrown::HashMap;
use std::path::{Path, PathBuf};

use tea_common::{Diagnostic, Diagnostics, Span, TeaError};
use tea_lexer::Lexer;
use tea_parser::Parser as TeaParser;
use tea_parser::{BinOp, Block, Expr, Item, Param, Params, Program, Stmt, TypeExpr, UnaryOp};

use crate::typectx::{compatible, PrimitiveKind, Type, TypeCtx, TypeData};

#[derive(Debug, Clone)]
struct Symbol {
    name: String,
    ty: Type,
}

/// One pass over a `Program`: resolves every identifier and type name,
/// type-checks every expression, and accumulates diagnostics rather than
/// failing fast (§7: Sema is the one batch-reporting stage).
pub struct Sema<'a> {
    ctx: &'a TypeCtx,
    diagnostics: Diagnostics,
    scopes: Vec<Vec<Symbol>>,
    /// Name of the function currently being checked, for the
    /// `Function '<name>': ...` error prefix. `None` at top level (import
    /// and global-variable diagnostics use `"<module>"` instead, matching
    /// the reference compiler's import-error phrasing).
    current_function: Option<String>,
    current_return_type: Option<Type>,
    loop_depth: u32,
    import_dirs: Vec<PathBuf>,
    /// Primary import-file suffix (`"tea"` by convention, §6).
    /// `.itea` — the reference compiler's own convention — is always tried
    /// as a fallback at each search directory.
    source_ext: String,
    file_id: u32,
    /// One entry per `using` statement actually processed, so a later
    /// compilation that never imports a module never sees its names
    /// (§8 "Import isolation").
    imported_modules: HashMap<String, ()>,
}

impl<'a> Sema<'a> {
    pub fn new(ctx: &'a TypeCtx, import_dirs: Vec<PathBuf>, file_id: u32) -> Self {
        Self {
            ctx,
            diagnostics: Diagnostics::new(),
            scopes: vec![Vec::new()],
            current_function: None,
            current_return_type: None,
            loop_depth: 0,
            import_dirs,
            source_ext: "tea".to_string(),
            file_id,
            imported_modules: HashMap::new(),
        }
    }

    pub fn with_source_ext(mut self, ext: impl Into<String>) -> Self {
        self.source_ext = ext.into();
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Run the pass and turn the result into a `TeaResult` (batch error iff
    /// any diagnostic is error-severity).
    pub fn check(mut self, program: &Program) -> Result<(), TeaError> {
        self.visit_program(program);
        std::mem::take(&mut self.diagnostics).into_result()
    }

    fn err(&mut self, message: impl std::fmt::Display, span: Span) {
        let function = self.current_function.as_deref().unwrap_or("<module>");
        self.diagnostics.add(Diagnostic::sema_error(function, message, span));
    }

    // --- scope --------------------------------------------------------

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn define(&mut self, name: String, ty: Type) {
        self.scopes.last_mut().expect("at least one scope").push(Symbol { name, ty });
    }

    fn lookup(&self, name: &str) -> Option<Type> {
        for frame in self.scopes.iter().rev() {
            if let Some(sym) = frame.iter().rev().find(|s| s.name == name) {
                return Some(sym.ty.clone());
            }
        }
        None
    }

    // --- types ----------------------------------------------------------

    fn resolve_type(&mut self, texpr: &TypeExpr) -> Type {
        let mut ty = match self.ctx.parse(&texpr.name) {
            Some(t) => t,
            None => {
                self.err(format!("undefined type '{}'", texpr.name), texpr.span);
                self.ctx.void()
            }
        };

        if let Some(signedness) = texpr.signedness {
            let kind = match &*ty.0 {
                TypeData::Primitive { kind, .. } => *kind,
                _ => PrimitiveKind::Int,
            };
            ty = self.ctx.primitive(kind, texpr.is_const, matches!(signedness, tea_parser::Signedness::Signed));
        } else if texpr.is_const && !ty.is_const() {
            if let TypeData::Primitive { kind, signed, .. } = &*ty.0 {
                ty = self.ctx.primitive(*kind, true, *signed);
            }
        }

        for &ptr_const in &texpr.pointer_const {
            ty = self.ctx.pointer(ty, ptr_const);
        }
        for &dim in &texpr.array_dims {
            ty = self.ctx.array(ty, dim, false);
        }
        ty
    }

    fn function_type(&mut self, params: &Params, ret: &TypeExpr) -> Type {
        let param_types: Vec<Type> = params.list.iter().map(|p: &Param| self.resolve_type(&p.ty)).collect();
        let ret_ty = self.resolve_type(ret);
        self.ctx.function(ret_ty, param_types, params.is_vararg)
    }

    // --- program / items -------------------------------------------------

    fn visit_program(&mut self, program: &Program) {
        for item in &program.items {
            self.visit_item(item);
        }
    }

    fn visit_item(&mut self, item: &Item) {
        match item {
            Item::UsingImport { path, span } => self.visit_using(path, *span),
            Item::FuncImport { name, params, return_type, .. } => {
                let ftype = self.function_type(params, return_type);
                self.define(name.clone(), ftype);
            }
            Item::Function { visibility: _, name, params, return_type, body, .. } => {
                let ftype = self.function_type(params, return_type);
                let ret_ty = match &*ftype.0 {
                    TypeData::Function { ret, .. } => ret.clone(),
                    _ => unreachable!(),
                };
                self.define(name.clone(), ftype);

                self.current_function = Some(name.clone());
                self.current_return_type = Some(ret_ty);
                self.push_scope();
                for p in &params.list {
                    let pty = self.resolve_type(&p.ty);
                    self.define(p.name.clone(), pty);
                }
                self.visit_block(body);
                self.pop_scope();
                self.current_function = None;
                self.current_return_type = None;
            }
            Item::VarDecl { name, ty, init, span, .. } => {
                let resolved = self.visit_var_decl(ty.as_ref(), init.as_ref(), *span);
                self.define(name.clone(), resolved);
            }
        }
    }

    fn visit_var_decl(&mut self, ty: Option<&TypeExpr>, init: Option<&Expr>, span: Span) -> Type {
        let declared = ty.map(|t| self.resolve_type(t));
        let init_ty = init.map(|e| self.visit_expr(e));
        match (declared, init_ty) {
            (Some(d), Some(i)) => {
                if !compatible(&d, &i) {
                    self.err(format!("variable initializer type mismatch, expected '{d}', got '{i}'"), span);
                }
                d
            }
            (Some(d), None) => d,
            (None, Some(i)) => i,
            (None, None) => self.ctx.void(),
        }
    }

    fn visit_using(&mut self, path: &str, span: Span) {
        if self.imported_modules.contains_key(path) {
            return;
        }
        let mut suffixes = vec![self.source_ext.clone()];
        if self.source_ext != "itea" {
            suffixes.push("itea".to_string());
        }
        let mut found: Option<PathBuf> = None;
        'search: for dir in &self.import_dirs {
            for ext in &suffixes {
                let candidate = dir.join(format!("{path}.{ext}"));
                if candidate.is_file() {
                    found = Some(candidate);
                    break 'search;
                }
            }
        }
        let Some(file_path) = found else {
            self.err(format!("failed to import module '{path}': failed to open file"), span);
            return;
        };

        let content = match std::fs::read_to_string(&file_path) {
            Ok(c) => c,
            Err(e) => {
                self.err(format!("failed to import module '{path}': {e}"), span);
                return;
            }
        };

        let module_name = stem_of(&file_path);
        self.imported_modules.insert(path.to_string(), ());

        let tokens = Lexer::new(&content, self.file_id + 1).tokenize();
        let tree = TeaParser::new(tokens, self.file_id + 1).parse_program();

        for node in &tree.items {
            match node {
                Item::FuncImport { name, params, return_type, .. } => {
                    let ftype = self.function_type(params, return_type);
                    self.define(format!("{module_name}::{name}"), ftype);
                }
                other => {
                    self.err("invalid root statement", other.span());
                }
            }
        }
    }

    // --- statements ------------------------------------------------------

    fn visit_block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Return { value, span } => {
                let expected = self.current_return_type.clone().unwrap_or_else(|| self.ctx.void());
                let got = match value {
                    Some(e) => self.visit_expr(e),
                    None => self.ctx.void(),
                };
                if expected != got && !compatible(&expected, &got) {
                    self.err(format!("return type mismatch, expected '{expected}', got '{got}'"), *span);
                }
            }
            Stmt::VarDecl { name, ty, init, span } => {
                let resolved = self.visit_var_decl(ty.as_ref(), init.as_ref(), *span);
                self.define(name.clone(), resolved);
            }
            Stmt::If { cond, then_block, elseifs, else_block, .. } => {
                self.visit_expr(cond);
                self.push_scope();
                self.visit_block(then_block);
                self.pop_scope();
                for (c, b) in elseifs {
                    self.visit_expr(c);
                    self.push_scope();
                    self.visit_block(b);
                    self.pop_scope();
                }
                if let Some(b) = else_block {
                    self.push_scope();
                    self.visit_block(b);
                    self.pop_scope();
                }
            }
            Stmt::While { cond, body, .. } => {
                self.visit_expr(cond);
                self.loop_depth += 1;
                self.push_scope();
                self.visit_block(body);
                self.pop_scope();
                self.loop_depth -= 1;
            }
            Stmt::For { init, cond, step, body, .. } => {
                self.push_scope();
                self.visit_stmt(init);
                self.visit_expr(cond);
                self.loop_depth += 1;
                self.push_scope();
                self.visit_block(body);
                self.pop_scope();
                self.visit_expr(step);
                self.loop_depth -= 1;
                self.pop_scope();
            }
            Stmt::Break { span } => {
                if self.loop_depth == 0 {
                    self.err("'break' outside of a loop", *span);
                }
            }
            Stmt::Continue { span } => {
                if self.loop_depth == 0 {
                    self.err("'continue' outside of a loop", *span);
                }
            }
            Stmt::Expr { expr, .. } => {
                self.visit_expr(expr);
            }
            Stmt::Assign { target, op, value, span } => {
                let target_ty = self.visit_expr(target);
                let value_ty = self.visit_expr(value);
                if target_ty.is_const() {
                    self.err(format!("cannot assign to a value of type '{target_ty}'"), *span);
                }
                if op.is_some() && !target_ty.is_numeric() && !target_ty.is_float() {
                    self.err(
                        format!("compound assignment operator cannot be applied to type '{target_ty}'"),
                        *span,
                    );
                } else if !compatible(&target_ty, &value_ty) {
                    self.err(format!("assignment type mismatch: '{target_ty}' vs '{value_ty}'"), *span);
                }
            }
        }
    }

    // --- expressions -------------------------------------------------

    fn visit_expr(&mut self, expr: &Expr) -> Type {
        match expr {
            Expr::Int(_, _) => self.ctx.int(true),
            Expr::Float(_, _) => self.ctx.float_(),
            Expr::Double(_, _) => self.ctx.double_(),
            Expr::Str(_, _) => self.ctx.string_(),
            Expr::Char(_, _) => self.ctx.char_(true),
            Expr::Path(segments, span) => self.visit_path(segments, *span),
            Expr::Unary { op, expr, span } => self.visit_unary(*op, expr, *span),
            Expr::Array { elements, .. } => {
                let mut elem_ty = None;
                for e in elements {
                    let t = self.visit_expr(e);
                    elem_ty.get_or_insert(t);
                }
                let elem = elem_ty.unwrap_or_else(|| self.ctx.void());
                self.ctx.array(elem, elements.len() as u32, true)
            }
            Expr::Binary { op, lhs, rhs, span } => self.visit_binary(*op, lhs, rhs, *span),
            Expr::Call { callee, args, span } => self.visit_call(callee, args, *span),
            Expr::Index { base, index, span } => {
                let base_ty = self.visit_expr(base);
                let idx_ty = self.visit_expr(index);
                if !idx_ty.is_numeric() {
                    self.err("index expression must be numeric", *span);
                }
                if !base_ty.is_indexable() {
                    self.err(format!("cannot index a value of type '{base_ty}'"), *span);
                    self.ctx.void()
                } else {
                    base_ty.element_type().unwrap_or_else(|| self.ctx.void())
                }
            }
        }
    }

    fn visit_path(&mut self, segments: &[String], span: Span) -> Type {
        if segments.len() == 1 {
            let name = &segments[0];
            match name.as_str() {
                "true" | "false" => return self.ctx.bool_(),
                "null" => return self.ctx.pointer(self.ctx.void(), false),
                _ => {}
            }
            if let Some(ty) = self.lookup(name) {
                return ty;
            }
            self.err(format!("use of undefined symbol '{name}'"), span);
            self.ctx.void()
        } else {
            let joined = segments.join("::");
            if let Some(ty) = self.lookup(&joined) {
                return ty;
            }
            self.err(format!("use of undefined symbol '{joined}'"), span);
            self.ctx.void()
        }
    }

    fn visit_unary(&mut self, op: UnaryOp, expr: &Expr, span: Span) -> Type {
        let ty = self.visit_expr(expr);
        match op {
            UnaryOp::Not => self.ctx.bool_(),
            UnaryOp::AddrOf => self.ctx.pointer(ty, false),
            UnaryOp::Deref => {
                if !ty.is_indexable() {
                    self.err(format!("cannot dereference a value of type '{ty}'"), span);
                    self.ctx.void()
                } else {
                    ty.element_type().unwrap_or_else(|| self.ctx.void())
                }
            }
        }
    }

    fn visit_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> Type {
        let lhs_ty = self.visit_expr(lhs);
        let rhs_ty = self.visit_expr(rhs);
        let op_text = binop_text(op);

        if !compatible(&lhs_ty, &rhs_ty) {
            self.err(format!("operator '{op_text}': type mismatch: '{lhs_ty}' vs '{rhs_ty}'"), span);
            return self.ctx.void();
        }

        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                if !lhs_ty.is_numeric() && !lhs_ty.is_float() {
                    self.err(format!("operator '{op_text}' cannot be applied to non-numeric type '{lhs_ty}'"), span);
                    self.ctx.void()
                } else {
                    lhs_ty
                }
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                if !lhs_ty.is_numeric() && !lhs_ty.is_float() && lhs_ty.to_string() != "string" {
                    self.err(format!("operator '{op_text}' cannot be applied to type '{lhs_ty}'"), span);
                    self.ctx.void()
                } else {
                    self.ctx.bool_()
                }
            }
            BinOp::And | BinOp::Or => self.ctx.bool_(),
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                if !lhs_ty.is_numeric() {
                    self.err(format!("operator '{op_text}' cannot be applied to non-integer type '{lhs_ty}'"), span);
                    self.ctx.void()
                } else {
                    lhs_ty
                }
            }
        }
    }

    fn visit_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Type {
        let callee_ty = self.visit_expr(callee);
        let arg_types: Vec<Type> = args.iter().map(|a| self.visit_expr(a)).collect();

        match &*callee_ty.0 {
            TypeData::Function { ret, params, vararg } => {
                if arg_types.len() < params.len() || (!vararg && arg_types.len() != params.len()) {
                    self.err(
                        format!("argument count mismatch: expected {}, got {}", params.len(), arg_types.len()),
                        span,
                    );
                } else {
                    for (i, (expected, got)) in params.iter().zip(arg_types.iter()).enumerate() {
                        if !compatible(expected, got) {
                            self.err(format!("argument {i}: expected type {expected}, got {got}"), span);
                        }
                    }
                }
                ret.clone()
            }
            _ => {
                self.err(format!("cannot call a value of type '{callee_ty}'"), span);
                self.ctx.void()
            }
        }
    }
}

fn binop_text(op: BinOp) -> &'static str {
    match op {
        BinOp::Or => "||",
        BinOp::And => "&&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::BitAnd => "&",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Gt => ">",
        BinOp::Le => "<=",
        BinOp::Ge => ">=",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("module").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tea_common::TeaError;

    fn check_source(src: &str) -> Result<(), TeaError> {
        let ctx = TypeCtx::new();
        let tokens = Lexer::new(src, 0).tokenize();
        let program = TeaParser::new(tokens, 0).parse_program();
        Sema::new(&ctx, Vec::new(), 0).check(&program)
    }

    fn messages(err: &TeaError) -> String {
        match err {
            TeaError::Semantic { errors } => {
                errors.iter().map(|d| d.message.clone()).collect::<Vec<_>>().join("\n")
            }
            other => other.to_string(),
        }
    }

    #[test]
    fn accepts_well_typed_function() {
        let result = check_source("public func add(int a, int b) -> int\n  return a + b;\nend\n");
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_undefined_symbol() {
        let err = check_source("public func f() -> int\n  return nope;\nend\n").unwrap_err();
        let msg = messages(&err);
        assert!(msg.contains("use of undefined symbol 'nope'"), "{msg}");
    }

    #[test]
    fn rejects_return_type_mismatch() {
        let err = check_source("public func bad() -> int\n  return 3.14;\nend\n").unwrap_err();
        let msg = messages(&err);
        assert!(msg.contains("return type mismatch"), "{msg}");
    }

    #[test]
    fn rejects_argument_count_mismatch() {
        let src = "public func add(int a, int b) -> int\n  return a + b;\nend\n\
                    public func main() -> int\n  return add(1);\nend\n";
        let err = check_source(src).unwrap_err();
        assert!(messages(&err).contains("argument count mismatch"));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let err = check_source("public func f() -> int\n  break;\n  return 0;\nend\n").unwrap_err();
        assert!(messages(&err).contains("'break' outside of a loop"));
    }
}
