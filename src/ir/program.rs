// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use super::{ExprId, Function};

/// The in-memory program model the pass mutates: a function table plus the
/// arena of symbol expressions that call and branch operands reference.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Program {
    functions: Vec<Function>,
    exprs: Vec<String>,
}

impl Program {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn function(&self, index: usize) -> &Function {
        &self.functions[index]
    }

    pub fn function_mut(&mut self, index: usize) -> &mut Function {
        &mut self.functions[index]
    }

    pub fn add_function(&mut self, function: Function) -> usize {
        self.functions.push(function);
        self.functions.len() - 1
    }

    #[must_use]
    pub fn function_index_by_name(&self, name: &str) -> Option<usize> {
        self.functions
            .iter()
            .position(|function| function.name() == name)
    }

    /// Creates an empty synthesized function, placed in its own code
    /// section named after it.
    pub fn create_injected_function(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        let mut function = Function::new(name.clone());
        function.injected = true;
        function.section_name = Some(format!(".text.{name}"));

        self.add_function(function)
    }

    /// Allocates a fresh symbol expression. Every call returns a new
    /// identity, even for a symbol that already has one.
    pub fn create_symbol_expr(&mut self, symbol: impl Into<String>) -> ExprId {
        self.exprs.push(symbol.into());
        ExprId {
            id: self.exprs.len() - 1,
        }
    }

    #[must_use]
    pub fn symbol_name(&self, expr: ExprId) -> &str {
        &self.exprs[expr.id]
    }
}
