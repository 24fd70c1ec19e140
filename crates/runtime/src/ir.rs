//! IR nodes — the typed tree the interpreter evaluates.
//!
//! An `IrNode` carries a kind tag, an optional result-type descriptor, a
//! list of source locations, and kind-specific payload. Child nodes are
//! `Rc<IrNode>` so a compiled closure can cheaply retain the body it closed
//! over (and, for `Function`/`AsyncFunction`, the whole original node as its
//! own serializable form — see `closures::CompiledClosure::original`).

use crate::types::{ScalarKind, TypeDescriptor};
use crate::value::Value;
use std::rc::Rc;
use vellum_core::Location;

/// One arm of a `Match` node.
#[derive(Debug, Clone)]
pub struct MatchCase {
    pub case: String,
    pub bind: Option<String>,
    pub body: Rc<IrNode>,
}

/// A captured variable name plus whether the closure may reassign it.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    pub name: String,
    pub mutable: bool,
}

#[derive(Debug, Clone)]
pub struct IrNode {
    pub kind: IrKind,
    pub result_type: Option<TypeDescriptor>,
    pub locations: Vec<Location>,
}

impl IrNode {
    pub fn new(kind: IrKind) -> Rc<Self> {
        Rc::new(Self {
            kind,
            result_type: None,
            locations: Vec::new(),
        })
    }

    pub fn with_location(kind: IrKind, location: Location) -> Rc<Self> {
        Rc::new(Self {
            kind,
            result_type: None,
            locations: vec![location],
        })
    }

    pub fn with_type(mut self, ty: TypeDescriptor) -> Self {
        self.result_type = Some(ty);
        self
    }
}

#[derive(Debug, Clone)]
pub enum IrKind {
    /// A literal value embedded directly in the tree.
    Value(Value),
    Variable {
        name: String,
        mutable: bool,
        captured: bool,
    },
    Let {
        name: String,
        mutable: bool,
        value: Rc<IrNode>,
    },
    Assign {
        name: String,
        value: Rc<IrNode>,
    },
    Block(Vec<Rc<IrNode>>),
    IfElse {
        cond: Rc<IrNode>,
        then_branch: Rc<IrNode>,
        else_branch: Rc<IrNode>,
    },
    Match {
        expr: Rc<IrNode>,
        cases: Vec<MatchCase>,
    },
    While {
        cond: Rc<IrNode>,
        body: Rc<IrNode>,
        label: Option<String>,
    },
    ForArray {
        binder: String,
        index_binder: Option<String>,
        collection: Rc<IrNode>,
        body: Rc<IrNode>,
        label: Option<String>,
    },
    ForSet {
        binder: String,
        collection: Rc<IrNode>,
        body: Rc<IrNode>,
        label: Option<String>,
    },
    ForDict {
        key_binder: String,
        value_binder: String,
        collection: Rc<IrNode>,
        body: Rc<IrNode>,
        label: Option<String>,
    },
    Function {
        captures: Vec<CaptureSpec>,
        params: Vec<String>,
        body: Rc<IrNode>,
    },
    AsyncFunction {
        captures: Vec<CaptureSpec>,
        params: Vec<String>,
        body: Rc<IrNode>,
    },
    Call {
        func: Rc<IrNode>,
        args: Vec<Rc<IrNode>>,
    },
    CallAsync {
        func: Rc<IrNode>,
        args: Vec<Rc<IrNode>>,
    },
    Platform {
        name: String,
        type_params: Vec<TypeDescriptor>,
        args: Vec<Rc<IrNode>>,
        is_async: bool,
        optional: bool,
    },
    Builtin {
        name: String,
        type_params: Vec<TypeDescriptor>,
        args: Vec<Rc<IrNode>>,
    },
    Return(Rc<IrNode>),
    Break(Option<String>),
    Continue(Option<String>),
    Error(Rc<IrNode>),
    TryCatch {
        try_block: Rc<IrNode>,
        message_var: String,
        location_var: String,
        catch_block: Rc<IrNode>,
        finally_block: Option<Rc<IrNode>>,
    },
    NewArray {
        element_type: TypeDescriptor,
        items: Vec<Rc<IrNode>>,
    },
    NewSet {
        element_type: TypeDescriptor,
        items: Vec<Rc<IrNode>>,
    },
    NewDict {
        key_type: TypeDescriptor,
        value_type: TypeDescriptor,
        pairs: Vec<(Rc<IrNode>, Rc<IrNode>)>,
    },
    NewRef {
        inner_type: TypeDescriptor,
        value: Rc<IrNode>,
    },
    NewVector {
        element_kind: ScalarKind,
        items: Vec<Rc<IrNode>>,
    },
    Struct {
        type_descriptor: TypeDescriptor,
        fields: Vec<(String, Rc<IrNode>)>,
    },
    GetField {
        expr: Rc<IrNode>,
        name: String,
    },
    Variant {
        type_descriptor: TypeDescriptor,
        case: String,
        value: Rc<IrNode>,
    },
    WrapRecursive(Rc<IrNode>),
    UnwrapRecursive(Rc<IrNode>),
}

impl IrKind {
    pub fn name(&self) -> &'static str {
        match self {
            IrKind::Value(_) => "Value",
            IrKind::Variable { .. } => "Variable",
            IrKind::Let { .. } => "Let",
            IrKind::Assign { .. } => "Assign",
            IrKind::Block(_) => "Block",
            IrKind::IfElse { .. } => "IfElse",
            IrKind::Match { .. } => "Match",
            IrKind::While { .. } => "While",
            IrKind::ForArray { .. } => "ForArray",
            IrKind::ForSet { .. } => "ForSet",
            IrKind::ForDict { .. } => "ForDict",
            IrKind::Function { .. } => "Function",
            IrKind::AsyncFunction { .. } => "AsyncFunction",
            IrKind::Call { .. } => "Call",
            IrKind::CallAsync { .. } => "CallAsync",
            IrKind::Platform { .. } => "Platform",
            IrKind::Builtin { .. } => "Builtin",
            IrKind::Return(_) => "Return",
            IrKind::Break(_) => "Break",
            IrKind::Continue(_) => "Continue",
            IrKind::Error(_) => "Error",
            IrKind::TryCatch { .. } => "TryCatch",
            IrKind::NewArray { .. } => "NewArray",
            IrKind::NewSet { .. } => "NewSet",
            IrKind::NewDict { .. } => "NewDict",
            IrKind::NewRef { .. } => "NewRef",
            IrKind::NewVector { .. } => "NewVector",
            IrKind::Struct { .. } => "Struct",
            IrKind::GetField { .. } => "GetField",
            IrKind::Variant { .. } => "Variant",
            IrKind::WrapRecursive(_) => "WrapRecursive",
            IrKind::UnwrapRecursive(_) => "UnwrapRecursive",
        }
    }
}
