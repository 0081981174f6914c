//! The parser driver.
//!
//! Feeds each logical line to every active compilation branch. A
//! conditional directive translates into branch operations (fork on
//! `#if`, sibling fork on `#elif`/`#else`, reactivation and
//! consolidation on `#endif`); any other token drives the per-branch
//! declaration machine: arising specifications accumulate specifiers and
//! declarators, finalize into symbols at `;`/`,`, and open function or
//! initializer scopes at `{`/`=`. After every line the branch tree is
//! consolidated to a fixed point.

use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, warn};

use crate::branch::{Adducer, BranchId, BranchTree, MacroCollect, Requester};
use crate::cond::{Cond, Conditions};
use crate::diag::{AnalyzeError, Diagnostic};
use crate::expr::parse_condition;
use crate::scope::{ArisingSpec, Declarator, Frame, SigScope, TagRef};
use crate::symbol::{
    Family, Linkage, Origin, Param, Signature, StorageClass, Symbol, TypeInfo,
};
use crate::token::{Loc, LogicalLine, Token, TokenKind};
use crate::track::Track;

const TYPE_SPECIFIERS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "_Bool",
    "_Complex",
];

const QUALIFIERS: &[&str] = &["const", "volatile", "restrict", "inline", "_Noreturn"];

const STATEMENT_HEADS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "return", "break", "continue", "goto", "case",
    "default", "sizeof", "asm",
];

fn is_type_specifier(text: &str) -> bool {
    TYPE_SPECIFIERS.contains(&text)
}

fn is_qualifier(text: &str) -> bool {
    QUALIFIERS.contains(&text)
}

fn is_keyword(text: &str) -> bool {
    is_type_specifier(text)
        || is_qualifier(text)
        || STATEMENT_HEADS.contains(&text)
        || StorageClass::from_keyword(text).is_some()
        || matches!(text, "struct" | "union" | "enum")
}

fn is_plain_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// A token captured for `ls --literal` / `ls --comment`, qualified by
/// the condition under which its line is compiled.
#[derive(Debug, Clone)]
pub struct Captured {
    pub token: Token,
    pub cond: Cond,
}

/// One `#if`..`#endif` currently open. `owners` are the branches that
/// were suspended by the opening directive (one per leaf active at the
/// time), `current` their latest arm, `arms` every arm forked so far.
#[derive(Debug)]
struct OpenConditional {
    owners: Vec<BranchId>,
    current: Vec<Option<BranchId>>,
    arms: Vec<BranchId>,
    /// Disjunction of the branch conditions opened so far.
    collected: Cond,
    has_else: bool,
    loc: Loc,
}

/// Parser state for one translation unit.
pub struct Parser {
    conds: Rc<Conditions>,
    pub tree: BranchTree,
    pub track: Track,
    pub index: crate::symbol::SymbolIndex,
    pub diagnostics: Vec<Diagnostic>,
    pub literals: Vec<Captured>,
    pub comments: Vec<Captured>,
    pub includes: Vec<String>,
    open_conditionals: Vec<OpenConditional>,
    literal_at: HashMap<Loc, usize>,
    comment_at: HashMap<Loc, usize>,
}

impl Parser {
    /// `assume` gates the root branch; pass ⊤ for an unconstrained parse.
    pub fn new(conds: Rc<Conditions>, assume: Cond) -> Self {
        Self {
            conds,
            tree: BranchTree::new(assume),
            track: Track::new(),
            index: crate::symbol::SymbolIndex::new(),
            diagnostics: Vec::new(),
            literals: Vec::new(),
            comments: Vec::new(),
            includes: Vec::new(),
            open_conditionals: Vec::new(),
            literal_at: HashMap::new(),
            comment_at: HashMap::new(),
        }
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conds
    }

    /// Dispatches one logical line to the branch tree, then consolidates
    /// to a fixed point.
    pub fn pursue_line(&mut self, line: &LogicalLine) -> Result<(), AnalyzeError> {
        let leaves = self.tree.active_branches(self.tree.root());
        for &leaf in &leaves {
            self.track.line(&self.tree.get(leaf).label, &line.to_string());
        }

        if let Some(directive) = line.directive().cloned() {
            for &leaf in &leaves {
                let cond = self.tree.get(leaf).conditions;
                for token in line.directive_body() {
                    if token.kind.is_comment() {
                        self.record_comment(token, cond);
                    }
                }
            }
            match directive.text.as_str() {
                "#if" | "#ifdef" | "#ifndef" => self.open_conditional(line, &directive, leaves),
                "#elif" => self.next_arm(line, &directive, false),
                "#else" => self.next_arm(line, &directive, true),
                "#endif" => self.close_conditional(&directive),
                _ => self.plain_directive(line, &directive, leaves)?,
            }
        } else {
            for leaf in leaves {
                for token in &line.tokens {
                    // A branch may dead-end mid-line.
                    if !self.tree.get(leaf).active {
                        break;
                    }
                    self.pursue_token(leaf, token)?;
                }
            }
        }

        let root = self.tree.root();
        while self.tree.consolidate_branches(&self.conds, &mut self.track, root) {}
        Ok(())
    }

    /// End of input: diagnoses unterminated conditionals and incomplete
    /// declarations still on a scope stack.
    pub fn finish(&mut self) -> Result<(), AnalyzeError> {
        while let Some(open) = self.open_conditionals.pop() {
            let d = Diagnostic::warning(open.loc, "unterminated conditional");
            warn!("{}", d);
            self.diagnostics.push(d);
        }
        let leaves = self.tree.active_branches(self.tree.root());
        for leaf in leaves.iter() {
            if self.tree.get(*leaf).scopes.current().is_arising() {
                let d = Diagnostic::warning(None, "incomplete declaration at end of input");
                warn!("{}", d);
                self.diagnostics.push(d);
            }
        }
        if leaves.len() != 1 {
            debug!("{} branches live at end of input", leaves.len());
        }
        Ok(())
    }

    // ─── Conditional directives ────────────────────────────────────────

    fn arm_condition(&mut self, line: &LogicalLine, directive: &Token) -> Cond {
        let body = line.directive_body();
        match directive.text.as_str() {
            "#ifdef" | "#ifndef" => {
                let cond = match body.iter().find(|t| t.is_identifier()) {
                    Some(name) => self.conds.defined(&name.text),
                    None => {
                        self.warn(directive.loc, format!("malformed {}", directive.text));
                        self.conds.top()
                    }
                };
                if directive.text == "#ifndef" {
                    -cond
                } else {
                    cond
                }
            }
            _ => {
                let parsed = parse_condition(&self.conds, body);
                if let Some(raw) = parsed.approximated {
                    self.warn(
                        directive.loc,
                        format!("condition approximated by opaque atom: `{}'", raw),
                    );
                }
                parsed.cond
            }
        }
    }

    fn open_conditional(&mut self, line: &LogicalLine, directive: &Token, leaves: Vec<BranchId>) {
        let gate = self.arm_condition(line, directive);
        let mut owners = Vec::new();
        let mut current = Vec::new();
        let mut arms = Vec::new();

        for leaf in leaves {
            self.tree.deactivate(&mut self.track, leaf);
            owners.push(leaf);
            let arm = self.fork_arm(leaf, gate, directive);
            if let Some(arm) = arm {
                arms.push(arm);
            }
            current.push(arm);
        }

        self.open_conditionals.push(OpenConditional {
            owners,
            current,
            arms,
            collected: gate,
            has_else: false,
            loc: directive.loc,
        });
    }

    fn next_arm(&mut self, line: &LogicalLine, directive: &Token, is_else: bool) {
        let gate_raw = if is_else {
            self.conds.top()
        } else {
            self.arm_condition(line, directive)
        };

        let Some(mut open) = self.open_conditionals.pop() else {
            self.warn(directive.loc, format!("stray {}", directive.text));
            return;
        };
        if open.has_else {
            self.warn(directive.loc, format!("{} after #else", directive.text));
        }

        let gate = self.conds.conjunction(gate_raw, -open.collected);
        for i in 0..open.owners.len() {
            if let Some(arm) = open.current[i] {
                self.tree.deactivate(&mut self.track, arm);
            }
            let arm = self.fork_arm(open.owners[i], gate, directive);
            if let Some(arm) = arm {
                open.arms.push(arm);
            }
            open.current[i] = arm;
        }

        open.collected = self.conds.disjunction(open.collected, gate);
        open.has_else = is_else;
        self.open_conditionals.push(open);
    }

    fn close_conditional(&mut self, directive: &Token) {
        let Some(open) = self.open_conditionals.pop() else {
            self.warn(directive.loc, "stray #endif".to_string());
            return;
        };

        // Reactivate every arm that did not dead-end, so reconverged
        // siblings can join.
        for &arm in &open.arms {
            if !self.tree.get(arm).failed {
                self.tree.activate(&mut self.track, arm);
            }
        }

        // A conditional without an exhaustive arm set leaves a remainder:
        // the implicit empty else-branch, carrying the owner's pre-fork
        // state.
        let remainder = -open.collected;
        for &owner in &open.owners {
            if !self.conds.is_bottom(self.conds.conjunction(
                self.tree.get(owner).conditions,
                remainder,
            )) && !open.has_else
            {
                self.fork_arm(owner, remainder, directive);
            }
            let root = owner;
            while self.tree.consolidate_branches(&self.conds, &mut self.track, root) {}
        }
    }

    /// Forks one conditional arm off `owner`, unless it is unsatisfiable
    /// there.
    fn fork_arm(&mut self, owner: BranchId, gate: Cond, directive: &Token) -> Option<BranchId> {
        let reachable = self.conds.conjunction(self.tree.get(owner).conditions, gate);
        if self.conds.is_bottom(reachable) {
            debug!(
                "not forking {} under unsatisfiable {}",
                self.tree.get(owner).label,
                self.conds.display(gate)
            );
            return None;
        }
        let adducer = Adducer::Directive { name: directive.text.clone(), loc: directive.loc };
        Some(self.tree.fork(&self.conds, &mut self.track, owner, gate, adducer))
    }

    // ─── Non-conditional directives ────────────────────────────────────

    fn plain_directive(
        &mut self,
        line: &LogicalLine,
        directive: &Token,
        leaves: Vec<BranchId>,
    ) -> Result<(), AnalyzeError> {
        match directive.text.as_str() {
            "#define" => {
                for leaf in leaves {
                    self.tree.get_mut(leaf).token_requester =
                        Some(Requester::MacroDef(MacroCollect::new(directive.loc)));
                    for token in line.directive_body() {
                        self.pursue_token(leaf, token)?;
                    }
                    self.finish_define(leaf);
                }
            }
            "#include" => self.record_include(line),
            "#undef" | "#pragma" | "#error" | "#line" => {
                debug!("ignoring {} at {}", directive.text, directive.loc);
            }
            other => {
                debug!("unknown directive {} at {}", other, directive.loc);
            }
        }
        Ok(())
    }

    fn record_include(&mut self, line: &LogicalLine) {
        let body = line.directive_body();
        let name = match body.first() {
            Some(t) if t.kind == TokenKind::StringLiteral => {
                Some(t.text.trim_matches('"').to_string())
            }
            Some(t) if t.is("<") => {
                let inner: String = body[1..]
                    .iter()
                    .take_while(|t| !t.is(">"))
                    .map(|t| t.text.as_str())
                    .collect();
                Some(inner)
            }
            _ => None,
        };
        if let Some(name) = name {
            if !self.includes.contains(&name) {
                debug!("include {}", name);
                self.includes.push(name);
            }
        }
    }

    fn finish_define(&mut self, leaf: BranchId) {
        let Some(Requester::MacroDef(collect)) = self.tree.get_mut(leaf).token_requester.take()
        else {
            return;
        };
        let Some(name) = collect.name else {
            self.warn(collect.start, "malformed #define".to_string());
            return;
        };
        let replacement: Vec<&str> = collect.replacement.iter().map(|t| t.text.as_str()).collect();
        let specifiers = if collect.function_like {
            format!("({}) {}", collect.params.join(", "), replacement.join(" "))
        } else {
            replacement.join(" ")
        };
        let family = if collect.function_like {
            Family::MacroFunction
        } else {
            Family::MacroObject
        };
        let sym = Symbol {
            identifier: name,
            family,
            existence: self.tree.get(leaf).conditions,
            declarations: Vec::new(),
            definitions: vec![collect.name_loc.unwrap_or(collect.start)],
            linkage: Linkage::None,
            storage: StorageClass::Unspecified,
            type_info: TypeInfo { specifiers, ..Default::default() },
            signature: None,
            origin: Origin::File,
        };
        self.submit(sym);
    }

    // ─── Token dispatch ────────────────────────────────────────────────

    fn pursue_token(&mut self, leaf: BranchId, token: &Token) -> Result<(), AnalyzeError> {
        let cond = self.tree.get(leaf).conditions;

        if token.kind.is_comment() {
            self.record_comment(token, cond);
            return Ok(());
        }
        if matches!(
            token.kind,
            TokenKind::StringLiteral
                | TokenKind::CharLiteral
                | TokenKind::IntLiteral
                | TokenKind::FloatLiteral
        ) {
            self.record_literal(token, cond);
        }

        if self.tree.get(leaf).token_requester.is_some() {
            self.requester_token(leaf, token);
            return Ok(());
        }

        enum Dispatch {
            Arising,
            Signature,
            Initializer,
            Context,
        }
        let dispatch = match self.tree.get(leaf).scopes.current() {
            Frame::Arising(_) => Dispatch::Arising,
            Frame::FunctionSignature(_) => Dispatch::Signature,
            Frame::Initializer { .. } => Dispatch::Initializer,
            Frame::TranslationUnit | Frame::Compound | Frame::Function { .. } => Dispatch::Context,
        };
        match dispatch {
            Dispatch::Arising => self.arising_token(leaf, token),
            Dispatch::Signature => self.signature_token(leaf, token),
            Dispatch::Initializer => self.initializer_token(leaf, token),
            Dispatch::Context => self.context_token(leaf, token),
        }
    }

    /// A token arriving while a code element (a macro definition) has
    /// redirected the stream to itself.
    fn requester_token(&mut self, leaf: BranchId, token: &Token) {
        let branch = self.tree.get_mut(leaf);
        let Some(Requester::MacroDef(collect)) = branch.token_requester.as_mut() else {
            return;
        };

        if collect.name.is_none() {
            if token.is_identifier() {
                collect.name = Some(token.text.clone());
                collect.name_loc = Some(token.loc);
                collect.name_glued = token.whitespace_after.is_empty();
            }
            return;
        }
        if collect.in_params {
            match token.text.as_str() {
                ")" => collect.in_params = false,
                "," => {}
                "..." => collect.params.push("...".to_string()),
                _ if token.is_identifier() => collect.params.push(token.text.clone()),
                _ => {}
            }
            return;
        }
        if collect.replacement.is_empty()
            && collect.params.is_empty()
            && !collect.function_like
            && collect.name_glued
            && token.is("(")
        {
            collect.function_like = true;
            collect.in_params = true;
            return;
        }
        collect.replacement.push(token.clone());
    }

    /// Tokens at translation-unit or compound-statement scope.
    fn context_token(&mut self, leaf: BranchId, token: &Token) -> Result<(), AnalyzeError> {
        let in_function = self.tree.get(leaf).scopes.enclosing_function().is_some();
        let text = token.text.as_str();

        if token.kind == TokenKind::Identifier {
            if let Some(storage) = StorageClass::from_keyword(text) {
                self.start_arising(leaf, token.loc, |spec| spec.storage = storage);
            } else if is_type_specifier(text) {
                let word = text.to_string();
                self.start_arising(leaf, token.loc, |spec| spec.specifiers.push(word));
            } else if is_qualifier(text) {
                let word = text.to_string();
                self.start_arising(leaf, token.loc, |spec| spec.qualifiers.push(word));
            } else if let Some(family) = tag_family(text) {
                let loc = token.loc;
                self.start_arising(leaf, token.loc, move |spec| {
                    spec.tag = Some(TagRef { family, name: None, loc, defined: false })
                });
            } else if in_function {
                // Statement or label; decided by the next token.
                self.tree.get_mut(leaf).pending.push(token.clone());
            } else {
                // File scope: assume a typedef name opening a declaration.
                let word = text.to_string();
                self.start_arising(leaf, token.loc, |spec| spec.specifiers.push(word));
            }
            return Ok(());
        }

        match text {
            ":" if in_function => {
                // `identifier :` at statement start declares a label.
                let label = {
                    let branch = self.tree.get(leaf);
                    match branch.pending.tokens() {
                        [t]
                            if t.kind == TokenKind::Identifier
                                && !is_keyword(&t.text)
                                && is_plain_identifier(&t.text) =>
                        {
                            Some((t.text.clone(), t.loc))
                        }
                        _ => None,
                    }
                };
                match label {
                    Some((name, loc)) => {
                        self.tree.get_mut(leaf).pending.clear();
                        self.announce_label(leaf, name, loc);
                    }
                    None => self.tree.get_mut(leaf).pending.push(token.clone()),
                }
            }
            ";" => self.tree.get_mut(leaf).pending.clear(),
            "{" => {
                let branch = self.tree.get_mut(leaf);
                branch.pending.clear();
                branch.scopes.enter(Frame::Compound);
            }
            "}" => {
                let unbalanced = {
                    let branch = self.tree.get_mut(leaf);
                    branch.pending.clear();
                    if matches!(branch.scopes.current(), Frame::Compound) {
                        branch.scopes.leave();
                        if branch.scopes.current().is_function() {
                            branch.scopes.leave();
                        }
                        false
                    } else {
                        true
                    }
                };
                if unbalanced {
                    self.warn(token.loc, "unbalanced `}'".to_string());
                }
            }
            _ if in_function => self.tree.get_mut(leaf).pending.push(token.clone()),
            _ => {
                debug!("ignoring `{}' at {} outside any declaration", text, token.loc);
            }
        }
        Ok(())
    }

    fn start_arising(
        &mut self,
        leaf: BranchId,
        loc: Loc,
        init: impl FnOnce(&mut ArisingSpec),
    ) {
        let mut spec = ArisingSpec { start: Some(loc), ..Default::default() };
        init(&mut spec);
        self.tree.get_mut(leaf).scopes.enter(Frame::Arising(spec));
    }

    /// Tokens while an arising specification is on top of the stack.
    fn arising_token(&mut self, leaf: BranchId, token: &Token) -> Result<(), AnalyzeError> {
        // A struct/union/enum body is consumed inside the specification.
        {
            let branch = self.tree.get_mut(leaf);
            let Frame::Arising(spec) = branch.scopes.current_mut() else {
                return Err(AnalyzeError::Structural(format!(
                    "arising token without arising frame at {}",
                    token.loc
                )));
            };
            if spec.in_tag_body() {
                consume_tag_body_token(spec, token);
                return Ok(());
            }
        }

        let text = token.text.as_str();
        if token.kind == TokenKind::Identifier {
            let branch = self.tree.get_mut(leaf);
            let Frame::Arising(spec) = branch.scopes.current_mut() else { unreachable!() };
            if let Some(storage) = StorageClass::from_keyword(text) {
                spec.storage = storage;
            } else if is_type_specifier(text) {
                spec.specifiers.push(text.to_string());
            } else if is_qualifier(text) {
                spec.qualifiers.push(text.to_string());
            } else if let Some(family) = tag_family(text) {
                spec.tag = Some(TagRef { family, name: None, loc: token.loc, defined: false });
            } else if let Some(tag) = spec.tag.as_mut().filter(|t| t.name.is_none() && !t.defined)
            {
                tag.name = Some(text.to_string());
            } else if spec.declarator.name.is_none() {
                spec.declarator.name = Some(text.to_string());
                spec.declarator.name_loc = Some(token.loc);
            } else {
                debug!("extra identifier `{}' in declaration at {}", text, token.loc);
            }
            return Ok(());
        }

        match text {
            "*" => {
                if let Frame::Arising(spec) = self.tree.get_mut(leaf).scopes.current_mut() {
                    if spec.declarator.name.is_none() {
                        spec.declarator.pointer += 1;
                    }
                }
            }
            "[" => {
                if let Frame::Arising(spec) = self.tree.get_mut(leaf).scopes.current_mut() {
                    spec.declarator.array = true;
                }
            }
            "]" => {}
            "(" => {
                let opens_signature = {
                    let branch = self.tree.get(leaf);
                    match branch.scopes.current() {
                        Frame::Arising(spec) => {
                            spec.declarator.name.is_some() && spec.declarator.signature.is_none()
                        }
                        _ => false,
                    }
                };
                if opens_signature {
                    self.tree.get_mut(leaf).scopes.enter(Frame::FunctionSignature(SigScope {
                        sig: Signature::open(token.loc),
                        ..Default::default()
                    }));
                }
            }
            "=" => {
                self.tree.get_mut(leaf).scopes.enter(Frame::Initializer { depth: 0 });
            }
            "," => self.finalize_declarator(leaf, false, token.loc)?,
            ";" => self.finalize_spec(leaf, false, token.loc)?,
            "{" => {
                enum Body {
                    Tag,
                    Function,
                    Neither,
                }
                let body = {
                    let branch = self.tree.get(leaf);
                    match branch.scopes.current() {
                        Frame::Arising(spec) => {
                            if spec.tag.is_some() && spec.declarator.name.is_none() {
                                Body::Tag
                            } else if spec
                                .declarator
                                .signature
                                .as_ref()
                                .is_some_and(|s| s.complete())
                            {
                                Body::Function
                            } else {
                                Body::Neither
                            }
                        }
                        _ => Body::Neither,
                    }
                };
                match body {
                    Body::Tag => {
                        if let Frame::Arising(spec) =
                            self.tree.get_mut(leaf).scopes.current_mut()
                        {
                            if let Some(tag) = spec.tag.as_mut() {
                                tag.defined = true;
                            }
                            spec.body_depth = 1;
                        }
                    }
                    Body::Function => self.begin_function_body(leaf, token.loc)?,
                    Body::Neither => {
                        // This branch cannot make sense of the
                        // declaration; it dead-ends, siblings continue.
                        self.warn(token.loc, "unexpected `{' in declaration".to_string());
                        self.tree.fail(&mut self.track, leaf, "unexpected `{' in declaration");
                    }
                }
            }
            _ => {
                debug!("ignoring `{}' in declaration at {}", text, token.loc);
            }
        }
        Ok(())
    }

    /// Tokens between the `(` and `)` of a function signature.
    fn signature_token(&mut self, leaf: BranchId, token: &Token) -> Result<(), AnalyzeError> {
        let text = token.text.as_str();
        let mut param_error = None;
        let mut closed = None;

        {
            let branch = self.tree.get_mut(leaf);
            let Frame::FunctionSignature(scope) = branch.scopes.current_mut() else {
                return Err(AnalyzeError::Structural(format!(
                    "signature token without signature frame at {}",
                    token.loc
                )));
            };

            match text {
                "(" => {
                    scope.depth += 1;
                    scope.current.push(text.to_string());
                }
                ")" if scope.depth > 0 => {
                    scope.depth -= 1;
                    scope.current.push(text.to_string());
                }
                ")" => {
                    param_error = finish_param(scope);
                    scope.sig.closed = Some(token.loc);
                    closed = Some(scope.sig.clone());
                }
                "," if scope.depth == 0 => param_error = finish_param(scope),
                "..." => scope.sig.variadic = true,
                _ => {
                    if let Some(storage) = StorageClass::from_keyword(text) {
                        scope.current_storage = storage;
                    } else {
                        scope.current.push(text.to_string());
                    }
                }
            }
        }

        if let Some(message) = param_error {
            self.warn(token.loc, message);
        }
        if let Some(sig) = closed {
            let branch = self.tree.get_mut(leaf);
            branch.scopes.leave();
            match branch.scopes.current_mut() {
                Frame::Arising(spec) => {
                    spec.declarator.signature = Some(sig);
                }
                _ => {
                    return Err(AnalyzeError::Structural(format!(
                        "function signature closed without arising specification at {}",
                        token.loc
                    )))
                }
            }
        }
        Ok(())
    }

    /// Tokens inside `= …` up to the `,` or `;` that ends it.
    fn initializer_token(&mut self, leaf: BranchId, token: &Token) -> Result<(), AnalyzeError> {
        let text = token.text.as_str();
        let depth = {
            let branch = self.tree.get_mut(leaf);
            let Frame::Initializer { depth } = branch.scopes.current_mut() else {
                return Err(AnalyzeError::Structural(format!(
                    "initializer token without initializer frame at {}",
                    token.loc
                )));
            };
            match text {
                "{" | "(" | "[" => *depth += 1,
                "}" | ")" | "]" if *depth > 0 => *depth -= 1,
                _ => {}
            }
            *depth
        };

        if depth == 0 {
            match text {
                "," => {
                    self.tree.get_mut(leaf).scopes.leave();
                    self.finalize_declarator(leaf, true, token.loc)?;
                }
                ";" => {
                    self.tree.get_mut(leaf).scopes.leave();
                    self.finalize_spec(leaf, true, token.loc)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ─── Finalization ──────────────────────────────────────────────────

    /// Finalizes the current declarator of the arising specification into
    /// a symbol, leaving the specification open for further declarators.
    fn finalize_declarator(
        &mut self,
        leaf: BranchId,
        definition: bool,
        loc: Loc,
    ) -> Result<(), AnalyzeError> {
        let (spec, declarator) = {
            let branch = self.tree.get_mut(leaf);
            let Frame::Arising(spec) = branch.scopes.current_mut() else {
                return Err(AnalyzeError::Structural(format!(
                    "finalize called while top of stack is not an arising specification at {}",
                    loc
                )));
            };
            let declarator = std::mem::take(&mut spec.declarator);
            (spec.clone(), declarator)
        };

        let Some(name) = declarator.name.clone() else {
            return Ok(());
        };
        let sym = self.build_symbol(leaf, &spec, &declarator, name, definition, loc);
        self.submit(sym);
        Ok(())
    }

    /// Finalizes the whole specification at its `;`: the trailing
    /// declarator, then the tag and enumerators it carries.
    fn finalize_spec(
        &mut self,
        leaf: BranchId,
        definition: bool,
        loc: Loc,
    ) -> Result<(), AnalyzeError> {
        self.finalize_declarator(leaf, definition, loc)?;

        let spec = {
            let branch = self.tree.get_mut(leaf);
            match branch.scopes.leave() {
                Some(Frame::Arising(spec)) => spec,
                other => {
                    return Err(AnalyzeError::Structural(format!(
                        "finish_current_scope called while top of stack is {} at {}",
                        other.map(|f| f.to_string()).unwrap_or_else(|| "empty".into()),
                        loc
                    )))
                }
            }
        };
        self.announce_tag(leaf, &spec);
        Ok(())
    }

    fn begin_function_body(&mut self, leaf: BranchId, loc: Loc) -> Result<(), AnalyzeError> {
        let spec = {
            let branch = self.tree.get_mut(leaf);
            match branch.scopes.leave() {
                Some(Frame::Arising(spec)) => spec,
                _ => {
                    return Err(AnalyzeError::Structural(format!(
                        "function body without arising specification at {}",
                        loc
                    )))
                }
            }
        };
        let declarator = spec.declarator.clone();
        let name = declarator.name.clone().unwrap_or_default();

        let sym = self.build_symbol(leaf, &spec, &declarator, name.clone(), true, loc);
        self.submit(sym);
        self.announce_tag(leaf, &spec);

        let branch = self.tree.get_mut(leaf);
        branch.scopes.enter(Frame::Function { name });
        branch.scopes.enter(Frame::Compound);
        Ok(())
    }

    fn build_symbol(
        &self,
        leaf: BranchId,
        spec: &ArisingSpec,
        declarator: &Declarator,
        name: String,
        definition: bool,
        loc: Loc,
    ) -> Symbol {
        let branch = self.tree.get(leaf);
        let in_function = branch.scopes.enclosing_function().map(str::to_string);

        let family = if spec.storage == StorageClass::Typedef {
            Family::Typedef
        } else if declarator.signature.is_some() {
            Family::Function
        } else {
            Family::Variable
        };

        // Linkage: none inside a function; otherwise the storage class
        // decides, defaulting to external.
        let linkage = if in_function.is_some() {
            Linkage::None
        } else {
            match spec.storage {
                StorageClass::Static => Linkage::Internal,
                StorageClass::Typedef => Linkage::Typedef,
                _ => Linkage::External,
            }
        };

        let type_info = TypeInfo {
            specifiers: spec.specifier_text(),
            qualifiers: spec.qualifiers.join(" "),
            pointer: declarator.pointer,
            array: declarator.array,
        };

        let decl_loc = declarator.name_loc.unwrap_or(loc);
        Symbol {
            identifier: name,
            family,
            existence: branch.conditions,
            declarations: vec![decl_loc],
            definitions: if definition { vec![decl_loc] } else { Vec::new() },
            linkage,
            storage: spec.storage,
            type_info,
            signature: declarator.signature.clone(),
            origin: match in_function {
                Some(f) => Origin::Function(f),
                None => Origin::File,
            },
        }
    }

    /// Announces the tag symbol and enumerators a finalized specification
    /// carries.
    fn announce_tag(&mut self, leaf: BranchId, spec: &ArisingSpec) {
        let Some(tag) = &spec.tag else { return };
        let Some(name) = &tag.name else {
            // Anonymous tags name nothing; their enumerators still count.
            self.announce_enum_constants(leaf, spec);
            return;
        };

        let cond = self.tree.get(leaf).conditions;
        let sym = Symbol {
            identifier: name.clone(),
            family: tag.family,
            existence: cond,
            declarations: vec![tag.loc],
            definitions: if tag.defined { vec![tag.loc] } else { Vec::new() },
            linkage: Linkage::None,
            storage: StorageClass::Unspecified,
            type_info: TypeInfo { specifiers: spec.specifier_text(), ..Default::default() },
            signature: None,
            origin: match self.tree.get(leaf).scopes.enclosing_function() {
                Some(f) => Origin::Function(f.to_string()),
                None => Origin::File,
            },
        };
        self.submit(sym);
        self.announce_enum_constants(leaf, spec);
    }

    fn announce_enum_constants(&mut self, leaf: BranchId, spec: &ArisingSpec) {
        let cond = self.tree.get(leaf).conditions;
        let origin = match self.tree.get(leaf).scopes.enclosing_function() {
            Some(f) => Origin::Function(f.to_string()),
            None => Origin::File,
        };
        let type_text = spec.specifier_text();
        for (name, loc) in spec.enum_constants.clone() {
            let sym = Symbol {
                identifier: name,
                family: Family::EnumConstant,
                existence: cond,
                declarations: vec![loc],
                definitions: vec![loc],
                linkage: Linkage::None,
                storage: StorageClass::Unspecified,
                type_info: TypeInfo { specifiers: type_text.clone(), ..Default::default() },
                signature: None,
                origin: origin.clone(),
            };
            self.submit(sym);
        }
    }

    fn announce_label(&mut self, leaf: BranchId, name: String, loc: Loc) {
        let branch = self.tree.get(leaf);
        let origin = match branch.scopes.enclosing_function() {
            Some(f) => Origin::Function(f.to_string()),
            None => Origin::File,
        };
        let sym = Symbol {
            identifier: name,
            family: Family::Label,
            existence: branch.conditions,
            declarations: vec![loc],
            definitions: vec![loc],
            linkage: Linkage::None,
            storage: StorageClass::Unspecified,
            type_info: TypeInfo::default(),
            signature: None,
            origin,
        };
        self.submit(sym);
    }

    fn submit(&mut self, sym: Symbol) -> usize {
        let (index, diags) = self.index.announce(&self.conds, sym);
        for d in diags {
            warn!("{}", d);
            self.diagnostics.push(d);
        }
        index
    }

    fn warn(&mut self, loc: Loc, message: String) {
        let d = Diagnostic::warning(loc, message);
        warn!("{}", d);
        self.diagnostics.push(d);
    }

    fn record_literal(&mut self, token: &Token, cond: Cond) {
        match self.literal_at.get(&token.loc) {
            Some(&i) => {
                let widened = self.conds.disjunction(self.literals[i].cond, cond);
                self.literals[i].cond = widened;
            }
            None => {
                self.literal_at.insert(token.loc, self.literals.len());
                self.literals.push(Captured { token: token.clone(), cond });
            }
        }
    }

    fn record_comment(&mut self, token: &Token, cond: Cond) {
        match self.comment_at.get(&token.loc) {
            Some(&i) => {
                let widened = self.conds.disjunction(self.comments[i].cond, cond);
                self.comments[i].cond = widened;
            }
            None => {
                self.comment_at.insert(token.loc, self.comments.len());
                self.comments.push(Captured { token: token.clone(), cond });
            }
        }
    }
}

fn tag_family(text: &str) -> Option<Family> {
    match text {
        "struct" => Some(Family::TagStruct),
        "union" => Some(Family::TagUnion),
        "enum" => Some(Family::TagEnum),
        _ => None,
    }
}

/// Consumes one token of a struct/union/enum body, collecting enum
/// constants.
fn consume_tag_body_token(spec: &mut ArisingSpec, token: &Token) {
    let is_enum = spec.tag.as_ref().is_some_and(|t| t.family == Family::TagEnum);
    match token.text.as_str() {
        "{" => spec.body_depth += 1,
        "}" => spec.body_depth -= 1,
        "," if is_enum && spec.body_depth == 1 => spec.enum_skip = false,
        "=" if is_enum && spec.body_depth == 1 => spec.enum_skip = true,
        _ => {
            if is_enum
                && spec.body_depth == 1
                && !spec.enum_skip
                && token.kind == TokenKind::Identifier
                && !is_keyword(&token.text)
            {
                spec.enum_constants.push((token.text.clone(), token.loc));
            }
        }
    }
}

/// Closes the parameter currently collected in a signature scope.
/// Returns an error message when its storage class is not allowed.
fn finish_param(scope: &mut SigScope) -> Option<String> {
    let tokens = std::mem::take(&mut scope.current);
    let storage = std::mem::replace(&mut scope.current_storage, StorageClass::Unspecified);

    if tokens.is_empty() && storage == StorageClass::Unspecified {
        return None;
    }
    // `f(void)` declares no parameters.
    if tokens.len() == 1 && tokens[0] == "void" && storage == StorageClass::Unspecified {
        return None;
    }

    let name = match tokens.last() {
        Some(last)
            if tokens.len() >= 2 && is_plain_identifier(last) && !is_keyword(last) =>
        {
            Some(last.clone())
        }
        _ => None,
    };
    let type_len = if name.is_some() { tokens.len() - 1 } else { tokens.len() };
    let type_text = tokens[..type_len].join(" ");

    scope.sig.add_param(Param { type_text, name, storage }).err()
}
