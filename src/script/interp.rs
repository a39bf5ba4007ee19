//! Tree-walking evaluator over a [`SandboxContext`].

use super::args::Args;
use super::ast::{BoolOp, Expr, Stmt, StmtKind};
use super::budget::Budget;
use super::value::{Method, Value};
use super::{index, library, methods, ops};
use crate::config::ResourceLimits;
use crate::dataset::{Column, Dataset};
use crate::errors::{Result, SandboxError, ScriptErrorKind};
use crate::sandbox_builder::SandboxContext;

enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Interpreter<'a> {
    ctx: &'a mut SandboxContext,
    budget: Budget,
    output: Vec<String>,
    loop_depth: usize,
}

/// Invoke any callable value.
fn call_value(callee: &Value, args: &Args, budget: &mut Budget, output: &mut Vec<String>) -> Result<Value> {
    match callee {
        Value::Builtin(b) => library::call_builtin(*b, args, budget, output),
        Value::Function(f) => library::call_function(*f, args, budget),
        Value::Method { receiver, method } => methods::call_method(receiver, *method, args, budget),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))),
    }
}

fn unpack(value: &Value, count: usize) -> Result<Vec<Value>> {
    let items = library::iterate(value).map_err(|_| {
        SandboxError::type_error(format!(
            "cannot unpack non-iterable {} object",
            value.type_name()
        ))
    })?;
    match items.len().cmp(&count) {
        std::cmp::Ordering::Less => Err(SandboxError::value_error(format!(
            "not enough values to unpack (expected {}, got {})",
            count,
            items.len()
        ))),
        std::cmp::Ordering::Greater => Err(SandboxError::value_error(format!(
            "too many values to unpack (expected {})",
            count
        ))),
        std::cmp::Ordering::Equal => Ok(items),
    }
}

fn set_frame_attr(slot: &mut Value, attr: &str, value: Value, budget: &mut Budget) -> Result<()> {
    let Value::Frame(ds) = slot else {
        return Err(SandboxError::policy(
            attr,
            format!(
                "cannot set attribute '{}' on a '{}' object",
                attr,
                slot.type_name()
            ),
        ));
    };
    if attr == "columns" {
        let names = library::iterate(&value)?;
        if names.len() != ds.column_count() {
            return Err(SandboxError::value_error(format!(
                "Length mismatch: Expected axis has {} elements, new values have {} elements",
                ds.column_count(),
                names.len()
            )));
        }
        let mut columns = Vec::with_capacity(names.len());
        for (column, name) in ds.columns().iter().zip(&names) {
            let Value::Str(name) = name else {
                return Err(SandboxError::type_error(format!(
                    "column names must be strings, not '{}'",
                    name.type_name()
                )));
            };
            columns.push(Column::new(name.as_str(), column.cells().to_vec()));
        }
        *ds = Dataset::new(columns).map_err(|e| SandboxError::value_error(e.to_string()))?;
        return Ok(());
    }
    if ds.column(attr).is_some() {
        return index::set_item(slot, &Value::Str(attr.to_string()), value, budget);
    }
    Err(SandboxError::policy(
        attr,
        format!("cannot set attribute '{}' on a 'DataFrame' object", attr),
    ))
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a mut SandboxContext, limits: &ResourceLimits) -> Self {
        Self {
            ctx,
            budget: Budget::new(limits),
            output: Vec::new(),
            loop_depth: 0,
        }
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<()> {
        for stmt in program {
            self.exec(stmt)?;
        }
        Ok(())
    }

    /// Lines written by `print`.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn instructions(&self) -> u64 {
        self.budget.consumed()
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.exec_kind(&stmt.kind, stmt.line)
            .map_err(|e| e.at_line(stmt.line))
    }

    fn exec_kind(&mut self, kind: &StmtKind, line: usize) -> Result<Flow> {
        self.budget.tick(1)?;
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target)?;
                let rhs = self.eval(value)?;
                let updated = ops::binary(*op, &current, &rhs, &mut self.budget)?;
                self.assign(target, updated)?;
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy()? { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::For { targets, iter, body } => {
                let items = library::iterate(&self.eval(iter)?)?;
                self.loop_depth += 1;
                let result = self.run_for(targets, items, body);
                self.loop_depth -= 1;
                result?;
            }
            StmtKind::While { test, body } => {
                self.loop_depth += 1;
                let result = self.run_while(test, body);
                self.loop_depth -= 1;
                result?;
            }
            StmtKind::Break | StmtKind::Continue if self.loop_depth == 0 => {
                let word = if matches!(kind, StmtKind::Break) { "break" } else { "continue" };
                return Err(SandboxError::syntax(format!("'{}' outside loop", word), line));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Delete(target) => self.delete(target)?,
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy()? {
                    let message = match msg {
                        Some(m) => self.eval(m)?.display(),
                        None => String::new(),
                    };
                    return Err(SandboxError::script(ScriptErrorKind::AssertionError, message));
                }
            }
            StmtKind::Import { module } => {
                return Err(SandboxError::policy(
                    module.as_str(),
                    format!("import of '{}' is not allowed in the sandbox", module),
                ));
            }
        }
        Ok(Flow::Normal)
    }

    fn run_for(&mut self, targets: &[String], items: Vec<Value>, body: &[Stmt]) -> Result<()> {
        for item in items {
            self.budget.tick(1)?;
            if let [single] = targets {
                self.ctx.assign(single, item)?;
            } else {
                for (name, part) in targets.iter().zip(unpack(&item, targets.len())?) {
                    self.ctx.assign(name, part)?;
                }
            }
            if let Flow::Break = self.exec_block(body)? {
                break;
            }
        }
        Ok(())
    }

    fn run_while(&mut self, test: &Expr, body: &[Stmt]) -> Result<()> {
        loop {
            self.budget.tick(1)?;
            if !self.eval(test)?.truthy()? {
                return Ok(());
            }
            if let Flow::Break = self.exec_block(body)? {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    // places
    // ------------------------------------------------------------------

    fn assign(&mut self, target: &Expr, value: Value) -> Result<()> {
        match target {
            Expr::Name(name) => self.ctx.assign(name, value),
            Expr::Tuple(targets) | Expr::List(targets) => {
                let parts = unpack(&value, targets.len())?;
                for (t, part) in targets.iter().zip(parts) {
                    self.assign(t, part)?;
                }
                Ok(())
            }
            Expr::Subscript { value: base, index: key } => {
                let key = self.eval(key)?;
                if let Expr::Attribute { value: frame, attr } = base.as_ref() {
                    if attr == "loc" {
                        return self.modify(frame, |slot, budget| match slot {
                            Value::Frame(ds) => index::loc_set(ds, &key, value, budget),
                            other => Err(SandboxError::type_error(format!(
                                "'{}' object has no attribute 'loc'",
                                other.type_name()
                            ))),
                        });
                    }
                }
                self.modify(base, |slot, budget| index::set_item(slot, &key, value, budget))
            }
            Expr::Attribute { value: base, attr } => {
                let attr = attr.clone();
                self.modify(base, |slot, budget| set_frame_attr(slot, &attr, value, budget))
            }
            _ => Err(SandboxError::script(
                ScriptErrorKind::SyntaxError,
                "cannot assign to expression",
            )),
        }
    }

    /// Update the value behind `place`: in place for a name, otherwise by
    /// read, modify and write back.
    fn modify(
        &mut self,
        place: &Expr,
        f: impl FnOnce(&mut Value, &mut Budget) -> Result<()>,
    ) -> Result<()> {
        if let Expr::Name(name) = place {
            let slot = self.ctx.lookup_mut(name)?;
            return f(slot, &mut self.budget);
        }
        let mut current = self.eval(place)?;
        f(&mut current, &mut self.budget)?;
        self.assign(place, current)
    }

    fn delete(&mut self, target: &Expr) -> Result<()> {
        match target {
            Expr::Name(name) => self.ctx.unbind(name),
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.delete(item)?;
                }
                Ok(())
            }
            Expr::Subscript { value: base, index: key } => {
                let key = self.eval(key)?;
                self.modify(base, |slot, _| index::del_item(slot, &key))
            }
            _ => Err(SandboxError::script(
                ScriptErrorKind::SyntaxError,
                "cannot delete expression",
            )),
        }
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    /// Run `f` on the value of `expr`, borrowing named bindings instead of
    /// copying them.
    fn with_ref<R>(
        &mut self,
        expr: &Expr,
        f: impl FnOnce(&Value, &mut Budget, &mut Vec<String>) -> Result<R>,
    ) -> Result<R> {
        if let Expr::Name(name) = expr {
            self.budget.tick(1)?;
            let value = self.ctx.lookup(name)?;
            return f(value, &mut self.budget, &mut self.output);
        }
        let value = self.eval(expr)?;
        f(&value, &mut self.budget, &mut self.output)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.budget.tick(1)?;
        let value = self.eval_inner(expr)?;
        match &value {
            Value::Series(s) => self.budget.check_cells(s.len())?,
            Value::Frame(ds) => self.budget.check_cells(ds.cell_count())?,
            _ => {}
        }
        Ok(value)
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Name(name) => self.ctx.lookup(name).cloned(),
            Expr::List(items) => Ok(Value::List(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut out: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    if !key.is_scalar() && !matches!(key, Value::Tuple(_)) {
                        return Err(SandboxError::type_error(format!(
                            "unhashable type: '{}'",
                            key.type_name()
                        )));
                    }
                    let value = self.eval(v)?;
                    match out.iter_mut().find(|(existing, _)| super::value::values_equal(existing, &key)) {
                        Some(slot) => slot.1 = value,
                        None => out.push((key, value)),
                    }
                }
                Ok(Value::Dict(out))
            }
            Expr::Attribute { value, attr } => {
                self.with_ref(value, |base, _, _| methods::get_attr(base, attr))
            }
            Expr::Subscript { value, index: key } => {
                let key = self.eval(key)?;
                self.with_ref(value, |base, budget, _| index::get_item(base, &key, budget))
            }
            Expr::Call { func, args, kwargs } => {
                let mut call_args = Args::new(self.eval_all(args)?, Vec::with_capacity(kwargs.len()));
                for (name, e) in kwargs {
                    let value = self.eval(e)?;
                    call_args.keywords.push((name.clone(), value));
                }
                match func.as_ref() {
                    Expr::Attribute { value, attr } => self.call_attribute(value, attr, call_args),
                    other => self.with_ref(other, |callee, budget, output| {
                        call_value(callee, &call_args, budget, output)
                    }),
                }
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                ops::unary(*op, &v, &mut self.budget)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                ops::binary(*op, &l, &r, &mut self.budget)
            }
            Expr::Compare { left, ops: chain } => {
                let mut lhs = self.eval(left)?;
                let mut result = Value::Bool(true);
                for (i, (op, right)) in chain.iter().enumerate() {
                    let rhs = self.eval(right)?;
                    result = ops::compare(*op, &lhs, &rhs, &mut self.budget)?;
                    if i + 1 < chain.len() && !result.truthy()? {
                        return Ok(result);
                    }
                    lhs = rhs;
                }
                Ok(result)
            }
            Expr::BoolOp { op, left, right } => {
                let l = self.eval(left)?;
                let short_circuit = match op {
                    BoolOp::And => !l.truthy()?,
                    BoolOp::Or => l.truthy()?,
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(right)
                }
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr]) -> Result<Vec<Value>> {
        items.iter().map(|e| self.eval(e)).collect()
    }

    /// `receiver.attr(...)`, including pandas-style `inplace=True`.
    fn call_attribute(&mut self, receiver: &Expr, attr: &str, mut args: Args) -> Result<Value> {
        let inplace = match args.take_keyword("inplace") {
            Some(flag) => Some(flag.truthy()?),
            None => None,
        };
        let result = self.with_ref(receiver, |base, budget, output| {
            match methods::resolve_method(base, attr) {
                Some(m @ (Method::Series(_) | Method::Frame(_))) => {
                    methods::call_method(base, m, &args, budget)
                }
                Some(m) if inplace.is_none() => methods::call_method(base, m, &args, budget),
                None if inplace.is_none() => {
                    let callee = methods::get_attr(base, attr)?;
                    call_value(&callee, &args, budget, output)
                }
                _ => Err(SandboxError::type_error(format!(
                    "{}() got an unexpected keyword argument 'inplace'",
                    attr
                ))),
            }
        })?;
        if inplace != Some(true) {
            return Ok(result);
        }
        match receiver {
            Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. } => {
                self.assign(receiver, result)?;
            }
            _ => {}
        }
        Ok(Value::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Cell;
    use crate::policy::registry;
    use crate::sandbox_builder::build;
    use crate::script::parse;

    fn people() -> Dataset {
        Dataset::new(vec![
            Column::new(
                "name",
                vec![
                    Cell::Text(" ada ".into()),
                    Cell::Text("grace".into()),
                    Cell::Text("alan".into()),
                ],
            ),
            Column::new("age", vec![Cell::Int(36), Cell::Missing, Cell::Int(41)]),
        ])
        .unwrap()
    }

    fn run(code: &str) -> Result<SandboxContext> {
        let program = parse(code)?;
        let mut ctx = build(&people(), registry());
        Interpreter::new(&mut ctx, &ResourceLimits::default()).run(&program)?;
        Ok(ctx)
    }

    fn column(ctx: &SandboxContext, name: &str) -> Vec<Cell> {
        ctx.dataset().unwrap().column(name).unwrap().cells().to_vec()
    }

    #[test]
    fn test_fillna_with_median_assignment() {
        let ctx = run("df['age'] = df['age'].fillna(df['age'].median())").unwrap();
        assert_eq!(
            column(&ctx, "age"),
            vec![Cell::Int(36), Cell::Float(38.5), Cell::Int(41)]
        );
    }

    #[test]
    fn test_inplace_methods_write_back() {
        let ctx = run("df.dropna(subset=['age'], inplace=True)").unwrap();
        assert_eq!(ctx.dataset().unwrap().row_count(), 2);

        let ctx = run("df['age'].fillna(0, inplace=True)").unwrap();
        assert_eq!(column(&ctx, "age")[1], Cell::Int(0));
    }

    #[test]
    fn test_loc_and_str_accessor() {
        let code = "\
df['name'] = df['name'].str.strip().str.title()
df.loc[df['age'] > 40, 'senior'] = True
";
        let ctx = run(code).unwrap();
        assert_eq!(column(&ctx, "name")[0], Cell::Text("Ada".into()));
        assert_eq!(
            column(&ctx, "senior"),
            vec![Cell::Missing, Cell::Missing, Cell::Bool(true)]
        );
    }

    #[test]
    fn test_control_flow_and_unpacking() {
        let code = "\
total = 0
for i, v in [(1, 10), (2, 20), (3, 30)]:
    if i == 2:
        continue
    total += v
n = 0
while True:
    n += 1
    if n >= 4:
        break
df['k'] = total + n
";
        let ctx = run(code).unwrap();
        assert_eq!(column(&ctx, "k"), vec![Cell::Int(44); 3]);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = run("x = 1\ny = df['agee']").unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'agee' (line 2)");

        let err = run("df['z'] = [1, 2]").unwrap_err();
        assert!(err
            .to_string()
            .contains("Length of values (2) does not match length of index (3)"));
    }

    #[test]
    fn test_policy_violations() {
        assert!(run("open('x')").unwrap_err().is_policy_violation());
        assert!(run("np.load('x')").unwrap_err().is_policy_violation());
        assert!(run("np = 1").unwrap_err().is_policy_violation());
        assert!(run("import os").unwrap_err().is_policy_violation());
        assert!(run("df.to_csv('x')").unwrap_err().is_policy_violation());
    }

    #[test]
    fn test_runaway_loop_is_bounded() {
        let program = parse("while True:\n    pass\n").unwrap();
        let mut ctx = build(&people(), registry());
        let limits = ResourceLimits {
            max_instructions: 10_000,
            ..ResourceLimits::default()
        };
        let err = Interpreter::new(&mut ctx, &limits).run(&program).unwrap_err();
        assert!(err.to_string().starts_with("ResourceLimit:"));
    }

    #[test]
    fn test_print_is_captured() {
        let program = parse("print('rows', len(df))").unwrap();
        let mut ctx = build(&people(), registry());
        let mut interp = Interpreter::new(&mut ctx, &ResourceLimits::default());
        interp.run(&program).unwrap();
        assert_eq!(interp.output(), &["rows 3".to_string()]);
    }

    #[test]
    fn test_columns_assignment_and_chained_compare() {
        let ctx = run("df.columns = ['who', 'years']\nok = 30 < 36 <= 36\nassert ok, 'chain'").unwrap();
        assert_eq!(ctx.dataset().unwrap().column_names(), vec!["who", "years"]);
        let err = run("assert 1 > 2, 'bad plan'").unwrap_err();
        assert_eq!(err.to_string(), "AssertionError: bad plan (line 1)");
    }

    #[test]
    fn test_container_builtins() {
        let code = "\
pairs = dict([('x', 1)], y=2)
keys = set(['a', 'b', 'a'])
t = tuple(keys)
df['k'] = len(pairs) + len(keys) + len(t) + pairs['y']
";
        let ctx = run(code).unwrap();
        assert_eq!(column(&ctx, "k"), vec![Cell::Int(8); 3]);
    }

    #[test]
    fn test_text_growth_is_bounded() {
        let limits = ResourceLimits {
            max_text_bytes: 1 << 20,
            ..ResourceLimits::default()
        };
        let doubling = "s = 'ab'\nfor i in range(64):\n    s = s + s\n";
        let repeat = "df['name'] = df['name'] * 4611686018427387904";
        for code in [doubling, repeat] {
            let program = parse(code).unwrap();
            let mut ctx = build(&people(), registry());
            let err = Interpreter::new(&mut ctx, &limits).run(&program).unwrap_err();
            assert!(err.to_string().starts_with("ResourceLimit:"), "{}", err);
        }
    }
}
