//! The recursive-descent parser (§4.2).
//!
//! Productions return a tri-valued outcome instead of a plain `Result`:
//! matched (`Ok`), didn't match but consumed nothing meaningful — the
//! caller may backtrack and try another production (`Err(Status::Soft)`),
//! or matched the start of a construct and then hit a missing required
//! token (`Err(Status::Hard)`), which aborts the whole parse. `commit`
//! turns a `Soft` failure into a `Hard` one at the point a production has
//! already committed to its keyword/lexeme and a further soft failure
//! would otherwise silently swallow a real syntax error.

use log::debug;

use crate::common::SourcePos;
use crate::error::Error;
use crate::front::ast::{Ast, NodeId};
use crate::front::lex::{TokenId, TokenKind, TokenStream};
use crate::front::name_table::{NameId, NameKind, NameTable};
use crate::front::ops::Op;

enum Status {
    Soft,
    Hard(Error),
}

type PResult<T> = std::result::Result<T, Status>;

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        Status::Hard(e)
    }
}

struct Parser<'a> {
    tokens: &'a TokenStream,
    names: &'a mut NameTable,
    ast: &'a mut Ast,
    pos: usize,
    in_function: bool,
}

impl<'a> Parser<'a> {
    fn cur(&self) -> &crate::front::lex::Token {
        self.tokens.get(TokenId::new(self.pos))
    }

    fn cur_pos(&self) -> SourcePos {
        self.cur().pos.clone()
    }

    fn at_eof(&self) -> bool {
        matches!(self.cur().kind, TokenKind::Operator(Op::Eof))
    }

    fn bump(&mut self) {
        if !self.at_eof() {
            self.pos += 1;
        }
    }

    fn save(&self) -> usize {
        self.pos
    }

    fn restore(&mut self, saved: usize) {
        self.pos = saved;
    }

    fn eat_op(&mut self, op: Op) -> Option<SourcePos> {
        if let TokenKind::Operator(o) = self.cur().kind {
            if o == op {
                let pos = self.cur_pos();
                self.bump();
                return Some(pos);
            }
        }
        None
    }

    fn hard_expect_op(&mut self, op: Op, ctx: &str) -> PResult<SourcePos> {
        self.eat_op(op).ok_or_else(|| {
            Status::Hard(Error::Syntax {
                pos: self.cur_pos(),
                message: format!("expected `{}` {ctx}", op.descriptor().lexeme),
            })
        })
    }

    fn eat_identifier(&mut self) -> Option<(NameId, SourcePos)> {
        if let TokenKind::Identifier(id) = self.cur().kind {
            let pos = self.cur_pos();
            self.bump();
            Some((id, pos))
        } else {
            None
        }
    }

    fn hard_identifier(&mut self, ctx: &str) -> PResult<(NameId, SourcePos)> {
        self.eat_identifier().ok_or_else(|| {
            Status::Hard(Error::Syntax {
                pos: self.cur_pos(),
                message: format!("expected an identifier {ctx}"),
            })
        })
    }

    /// Turn a `Soft` failure into a `Hard` one: used once a production has
    /// consumed a lexically-committing token (a keyword, an opening
    /// bracket) and a further failure must not silently backtrack.
    fn commit<T>(&mut self, r: PResult<T>, message: &str) -> PResult<T> {
        match r {
            Err(Status::Soft) => Err(Status::Hard(Error::Syntax {
                pos: self.cur_pos(),
                message: message.to_string(),
            })),
            other => other,
        }
    }

    fn try_alt<F>(&mut self, f: F) -> PResult<Option<NodeId>>
    where
        F: FnOnce(&mut Self) -> PResult<NodeId>,
    {
        let saved = self.save();
        match f(self) {
            Ok(n) => Ok(Some(n)),
            Err(Status::Soft) => {
                self.restore(saved);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn push(&mut self, op: Op, left: Option<NodeId>, right: Option<NodeId>, pos: SourcePos) -> PResult<NodeId> {
        self.ast.push_op(op, left, right, pos).ok_or_else(|| {
            Status::Hard(Error::ArenaOverflow {
                what: "ast nodes",
                capacity: self.ast.len(),
            })
        })
    }

    fn push_num(&mut self, v: f64, pos: SourcePos) -> PResult<NodeId> {
        self.ast.push_number(v, pos).ok_or_else(|| {
            Status::Hard(Error::ArenaOverflow {
                what: "ast nodes",
                capacity: self.ast.len(),
            })
        })
    }

    fn push_id(&mut self, id: NameId, pos: SourcePos) -> PResult<NodeId> {
        self.ast.push_identifier(id, pos).ok_or_else(|| {
            Status::Hard(Error::ArenaOverflow {
                what: "ast nodes",
                capacity: self.ast.len(),
            })
        })
    }

    /// Chain `items` into a right-skewed list linked by `op`: zero items is
    /// `None`, one item is itself (no wrapper), two or more nest
    /// right-to-left (§3 Data Model invariant (iv)). Each link node takes
    /// the position of the item on its left.
    fn chain(&mut self, op: Op, mut items: Vec<NodeId>) -> PResult<Option<NodeId>> {
        let mut rest: Option<NodeId> = None;
        while let Some(item) = items.pop() {
            rest = Some(match rest {
                None => item,
                Some(r) => {
                    let pos = self.ast.get(item).pos.clone();
                    self.push(op, Some(item), Some(r), pos)?
                }
            });
        }
        Ok(rest)
    }

    // ---- Grammar ::= (FunctionDecl | Block)* EOF ----------------------

    fn program(&mut self) -> PResult<Option<NodeId>> {
        let mut items = Vec::new();
        while !self.at_eof() {
            if let Some(n) = self.try_alt(Self::function_decl)? {
                items.push(n);
                continue;
            }
            if let Some(n) = self.try_alt(Self::block)? {
                items.push(n);
                continue;
            }
            return Err(Status::Hard(Error::Syntax {
                pos: self.cur_pos(),
                message: "expected a function declaration or a statement".into(),
            }));
        }
        self.chain(Op::Sep, items)
    }

    // FunctionDecl ::= "Transaction" IdChain "->" Identifier "->" Block
    fn function_decl(&mut self) -> PResult<NodeId> {
        let transaction_pos = self.eat_op(Op::Transaction).ok_or(Status::Soft)?;

        let mut arg_ids = Vec::new();
        let mut arg_nodes = Vec::new();
        if !matches!(self.cur().kind, TokenKind::Operator(Op::Arrow)) {
            loop {
                let (id, pos) = self.hard_identifier("in the parameter list")?;
                arg_nodes.push(self.push_id(id, pos)?);
                arg_ids.push(id);
                if self.eat_op(Op::Comma).is_none() {
                    break;
                }
            }
        }
        self.hard_expect_op(Op::Arrow, "after the parameter list")?;
        let (name_id, name_pos) = self.hard_identifier("as the function name")?;
        self.hard_expect_op(Op::Arrow, "after the function name")?;

        debug!("{name_pos}: function declaration, {} argument(s)", arg_ids.len());
        self.names.mark_func(name_id, arg_ids.len() as u32);
        for id in &arg_ids {
            self.names.mark_var(*id, true);
        }

        let name_node = self.push_id(name_id, name_pos.clone())?;
        let args_node = self.chain(Op::Comma, arg_nodes)?;
        let header = self.push(Op::FuncHeader, Some(name_node), args_node, name_pos.clone())?;

        let was_in_function = self.in_function;
        self.in_function = true;
        let body = self.block();
        let body = self.commit(body, "expected a function body");
        self.in_function = was_in_function;
        let body = body?;

        self.push(Op::FuncDecl, Some(header), Some(body), transaction_pos)
    }

    // Block ::= "<" Block+ ">" | Statement
    fn block(&mut self) -> PResult<NodeId> {
        if self.eat_op(Op::Lt).is_some() {
            let mut items = Vec::new();
            loop {
                if self.eat_op(Op::Gt).is_some() {
                    break;
                }
                if self.at_eof() {
                    return Err(Status::Hard(Error::Syntax {
                        pos: self.cur_pos(),
                        message: "unterminated block, expected `>`".into(),
                    }));
                }
                let item = self.block();
                let item = self.commit(item, "expected a statement inside the block")?;
                items.push(item);
            }
            if items.is_empty() {
                return Err(Status::Hard(Error::Syntax {
                    pos: self.cur_pos(),
                    message: "a block must contain at least one statement".into(),
                }));
            }
            let chained = self.chain(Op::Sep, items)?;
            return Ok(chained.expect("non-empty item list yields Some"));
        }
        self.statement()
    }

    // Statement ::= (Input|Print|Pay|Text|VarDecl|Call|Assign) "%" | If | While
    fn statement(&mut self) -> PResult<NodeId> {
        if let Some(n) = self.try_alt(Self::if_stmt)? {
            return Ok(n);
        }
        if let Some(n) = self.try_alt(Self::while_stmt)? {
            return Ok(n);
        }
        let inner = self.simple_statement()?;
        self.hard_expect_op(Op::Percent, "to terminate the statement")?;
        Ok(inner)
    }

    fn simple_statement(&mut self) -> PResult<NodeId> {
        if let Some(n) = self.try_alt(Self::input_stmt)? {
            return Ok(n);
        }
        if let Some(n) = self.try_alt(Self::print_stmt)? {
            return Ok(n);
        }
        if let Some(n) = self.try_alt(Self::pay_stmt)? {
            return Ok(n);
        }
        if let Some(n) = self.try_alt(Self::text_stmt)? {
            return Ok(n);
        }
        if let Some(n) = self.try_alt(Self::var_decl_stmt)? {
            return Ok(n);
        }
        if let Some(n) = self.try_alt(Self::call_stmt)? {
            return Ok(n);
        }
        if let Some(n) = self.try_alt(Self::assign_stmt)? {
            return Ok(n);
        }
        Err(Status::Soft)
    }

    // If ::= "if" Expr "->" Block Else?
    fn if_stmt(&mut self) -> PResult<NodeId> {
        let if_pos = self.eat_op(Op::If).ok_or(Status::Soft)?;
        let cond = self.expr();
        let cond = self.commit(cond, "expected a condition after `if`")?;
        self.hard_expect_op(Op::Arrow, "after the `if` condition")?;
        let then_blk = self.block();
        let then_blk = self.commit(then_blk, "expected a block after `if ... ->`")?;

        let right = if let Some(else_pos) = self.eat_op(Op::Else) {
            let else_blk = self.block();
            let else_blk = self.commit(else_blk, "expected a block after `else`")?;
            // Wrapped in an `Else` node (rather than reusing `Sep`) so the IR
            // builder can tell "this if has an else" apart from "the then
            // block happens to be a multi-statement `Sep` chain" by value
            // alone, with no extra bit of state to thread through.
            self.push(Op::Else, Some(then_blk), Some(else_blk), else_pos)?
        } else {
            then_blk
        };
        self.push(Op::If, Some(cond), Some(right), if_pos)
    }

    // While ::= "while" Expr "->" Block
    fn while_stmt(&mut self) -> PResult<NodeId> {
        let while_pos = self.eat_op(Op::While).ok_or(Status::Soft)?;
        let cond = self.expr();
        let cond = self.commit(cond, "expected a condition after `while`")?;
        self.hard_expect_op(Op::Arrow, "after the `while` condition")?;
        let body = self.block();
        let body = self.commit(body, "expected a block after `while ... ->`")?;
        self.push(Op::While, Some(cond), Some(body), while_pos)
    }

    // Input ::= "Invest" Identifier
    fn input_stmt(&mut self) -> PResult<NodeId> {
        let invest_pos = self.eat_op(Op::Invest).ok_or(Status::Soft)?;
        let (id, id_pos) = self.hard_identifier("after `Invest`")?;
        let node = self.push_id(id, id_pos)?;
        self.push(Op::Invest, Some(node), None, invest_pos)
    }

    // Print ::= "ShowBalance" Expr
    fn print_stmt(&mut self) -> PResult<NodeId> {
        let show_pos = self.eat_op(Op::ShowBalance).ok_or(Status::Soft)?;
        let e = self.expr();
        let e = self.commit(e, "expected an expression after `ShowBalance`")?;
        self.push(Op::ShowBalance, Some(e), None, show_pos)
    }

    // Pay ::= "Pay" Expr
    fn pay_stmt(&mut self) -> PResult<NodeId> {
        let pay_pos = self.eat_op(Op::Pay).ok_or(Status::Soft)?;
        let e = self.expr();
        let e = self.commit(e, "expected an expression after `Pay`")?;
        self.push(Op::Pay, Some(e), None, pay_pos)
    }

    // Text ::= "Txt" "\"" Identifier "\""
    fn text_stmt(&mut self) -> PResult<NodeId> {
        let txt_pos = self.eat_op(Op::Txt).ok_or(Status::Soft)?;
        self.hard_expect_op(Op::Quote, "after `Txt`")?;
        let (id, id_pos) = self.hard_identifier("inside the quotes")?;
        self.hard_expect_op(Op::Quote, "to close the quoted text")?;
        let node = self.push_id(id, id_pos)?;
        self.push(Op::Txt, Some(node), None, txt_pos)
    }

    // VarDecl ::= "Account" Identifier
    fn var_decl_stmt(&mut self) -> PResult<NodeId> {
        let account_pos = self.eat_op(Op::Account).ok_or(Status::Soft)?;
        let (id, id_pos) = self.hard_identifier("after `Account`")?;
        self.names.mark_var(id, self.in_function);
        let node = self.push_id(id, id_pos)?;
        self.push(Op::Account, Some(node), None, account_pos)
    }

    // Call ::= Identifier "(" ExprChain ")", as a standalone statement.
    fn call_stmt(&mut self) -> PResult<NodeId> {
        let saved = self.save();
        let (id, pos) = self.eat_identifier().ok_or(Status::Soft)?;
        if self.eat_op(Op::LParen).is_none() {
            self.restore(saved);
            return Err(Status::Soft);
        }
        self.finish_call(id, pos)
    }

    // Assign ::= Identifier "=" Expr
    fn assign_stmt(&mut self) -> PResult<NodeId> {
        let saved = self.save();
        let (id, pos) = self.eat_identifier().ok_or(Status::Soft)?;
        if self.eat_op(Op::Assign).is_none() {
            self.restore(saved);
            return Err(Status::Soft);
        }
        if self.names.get(id).kind == NameKind::Func {
            return Err(Status::Hard(Error::Type {
                pos,
                message: format!("cannot assign to function `{}`", self.names.get(id).name),
            }));
        }
        self.names.mark_var(id, self.in_function);
        let lhs = self.push_id(id, pos.clone())?;
        let rhs = self.expr();
        let rhs = self.commit(rhs, "expected an expression on the right-hand side of `=`")?;
        self.push(Op::Assign, Some(lhs), Some(rhs), pos)
    }

    // ---- Expressions, in ascending precedence --------------------------

    // Expr ::= AddPr (("<"|">"|"<="|">="|"=="|"!=") AddPr)*
    fn expr(&mut self) -> PResult<NodeId> {
        let mut lhs = self.add_pr()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Operator(o @ (Op::Lt | Op::Gt | Op::Le | Op::Ge | Op::Eq | Op::Neq)) => o,
                _ => break,
            };
            let op_pos = self.cur_pos();
            self.bump();
            let rhs = self.add_pr();
            let rhs = self.commit(rhs, "expected an expression after a comparison operator")?;
            lhs = self.push(op, Some(lhs), Some(rhs), op_pos)?;
        }
        Ok(lhs)
    }

    // AddPr ::= MulPr (("+"|"-") MulPr)*
    fn add_pr(&mut self) -> PResult<NodeId> {
        let mut lhs = self.mul_pr()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Operator(o @ (Op::Add | Op::Sub)) => o,
                _ => break,
            };
            let op_pos = self.cur_pos();
            self.bump();
            let rhs = self.mul_pr();
            let rhs = self.commit(rhs, "expected an expression after `+`/`-`")?;
            lhs = self.push(op, Some(lhs), Some(rhs), op_pos)?;
        }
        Ok(lhs)
    }

    // MulPr ::= PowPr (("*"|"/") PowPr)*
    fn mul_pr(&mut self) -> PResult<NodeId> {
        let mut lhs = self.pow_pr()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Operator(o @ (Op::Mul | Op::Div)) => o,
                _ => break,
            };
            let op_pos = self.cur_pos();
            self.bump();
            let rhs = self.pow_pr();
            let rhs = self.commit(rhs, "expected an expression after `*`/`/`")?;
            lhs = self.push(op, Some(lhs), Some(rhs), op_pos)?;
        }
        Ok(lhs)
    }

    // PowPr ::= Primary ("^" PowPr)?   (right-associative)
    fn pow_pr(&mut self) -> PResult<NodeId> {
        let lhs = self.primary()?;
        if let Some(pow_pos) = self.eat_op(Op::Pow) {
            let rhs = self.pow_pr();
            let rhs = self.commit(rhs, "expected an exponent after `^`")?;
            return self.push(Op::Pow, Some(lhs), Some(rhs), pow_pos);
        }
        Ok(lhs)
    }

    // Primary ::= "(" Expr ")" | FuncOp | Call | Identifier | Num
    fn primary(&mut self) -> PResult<NodeId> {
        if self.eat_op(Op::LParen).is_some() {
            let e = self.expr();
            let e = self.commit(e, "expected an expression after `(`")?;
            self.hard_expect_op(Op::RParen, "to close `(`")?;
            return Ok(e);
        }
        if let TokenKind::Operator(o @ (Op::Sin | Op::Cos | Op::Sqrt)) = self.cur().kind {
            let op_pos = self.cur_pos();
            self.bump();
            self.hard_expect_op(Op::LParen, "after a function name")?;
            let e = self.expr();
            let e = self.commit(e, "expected an expression inside the function call")?;
            self.hard_expect_op(Op::RParen, "to close the function call")?;
            return self.push(o, Some(e), None, op_pos);
        }
        if matches!(self.cur().kind, TokenKind::Identifier(_)) {
            let (id, pos) = self.eat_identifier().expect("checked above");
            if self.eat_op(Op::LParen).is_some() {
                return self.finish_call(id, pos);
            }
            return self.push_id(id, pos);
        }
        if let TokenKind::Number(v) = self.cur().kind {
            let num_pos = self.cur_pos();
            self.bump();
            return self.push_num(v, num_pos);
        }
        Err(Status::Soft)
    }

    // FuncOp ::= ("sin"|"cos"|"sqrt") "(" Expr ")" is folded into `primary`.

    // Finishes `name(` once the opening paren has already been consumed.
    fn finish_call(&mut self, id: NameId, pos: SourcePos) -> PResult<NodeId> {
        let args = self.expr_chain()?;
        self.hard_expect_op(Op::RParen, "to close the call's argument list")?;
        let name_node = self.push_id(id, pos.clone())?;
        self.push(Op::Call, Some(name_node), args, pos)
    }

    // ExprChain ::= (Expr ("," Expr)*)?
    fn expr_chain(&mut self) -> PResult<Option<NodeId>> {
        if matches!(self.cur().kind, TokenKind::Operator(Op::RParen)) {
            return Ok(None);
        }
        let mut items = vec![self.expr()?];
        while self.eat_op(Op::Comma).is_some() {
            let e = self.expr();
            let e = self.commit(e, "expected an expression after `,`")?;
            items.push(e);
        }
        self.chain(Op::Comma, items)
    }
}

/// Parse `tokens` into `ast`, populating `names`' `kind`/`argsCount` as
/// declarations and uses are discovered (§4.2 "Side effects on the name
/// table"). Type/scope consistency that depends on a name's *final* kind
/// (e.g. "calling a variable is a type error") is deferred to the IR
/// builder, since a function's `Transaction` declaration and a call to it
/// may appear in either order at the top level.
pub fn parse(tokens: &TokenStream, names: &mut NameTable, ast: &mut Ast) -> crate::error::Result<()> {
    let (result, cur_pos) = {
        let mut p = Parser {
            tokens,
            names,
            ast,
            pos: 0,
            in_function: false,
        };
        let r = p.program();
        (r, p.cur_pos())
    };
    match result {
        Ok(root) => {
            ast.root = root;
            Ok(())
        }
        Err(Status::Hard(e)) => Err(e),
        Err(Status::Soft) => Err(Error::Syntax {
            pos: cur_pos,
            message: "unexpected token".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::ast::NodeValue;
    use crate::front::lex::lex;

    fn parse_str(src: &str) -> (Ast, NameTable) {
        let mut names = NameTable::new(256, 2048);
        let file = internment::Intern::new("test.mn".to_string());
        let tokens = lex(src, file, &mut names, 4096).unwrap();
        let mut ast = Ast::new(4096);
        parse(&tokens, &mut names, &mut ast).unwrap();
        (ast, names)
    }

    #[test]
    fn single_top_level_statement_without_blocks() {
        let (ast, _) = parse_str("Account x %");
        let root = ast.root.unwrap();
        assert_eq!(ast.get(root).value, NodeValue::Operator(Op::Account));
    }

    #[test]
    fn assign_marks_target_as_variable() {
        let (_, names) = parse_str("Account x % x = 3\u{20BD} + 4\u{20BD} %");
        let id = names.find(internment::Intern::new("x".to_string())).unwrap();
        assert_eq!(names.get(id).kind, NameKind::Var);
    }

    #[test]
    fn empty_if_body_is_rejected() {
        let mut names = NameTable::new(256, 2048);
        let file = internment::Intern::new("test.mn".to_string());
        let tokens = lex("if 1\u{20BD} > 0\u{20BD} -> < >", file, &mut names, 4096).unwrap();
        let mut ast = Ast::new(4096);
        let err = parse(&tokens, &mut names, &mut ast).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn zero_arg_function_is_accepted() {
        let (_, names) = parse_str("Transaction -> f -> Pay 1\u{20BD} %");
        let id = names.find(internment::Intern::new("f".to_string())).unwrap();
        assert_eq!(names.get(id).args_count, 0);
    }

    #[test]
    fn function_call_builds_call_node() {
        let (ast, _) = parse_str(
            "Transaction a, b -> add -> Pay a + b % Account r % r = add(2\u{20BD}, 3\u{20BD}) % ShowBalance r %",
        );
        assert!(ast.root.is_some());
    }

    #[test]
    fn if_else_wraps_branches_in_an_else_node() {
        let (ast, _) = parse_str("if 1\u{20BD} > 0\u{20BD} -> ShowBalance 1\u{20BD} % else ShowBalance 0\u{20BD} %");
        let root = ast.root.unwrap();
        let if_node = ast.get(root);
        assert_eq!(if_node.value, NodeValue::Operator(Op::If));
        let right = ast.get(if_node.right.unwrap());
        assert_eq!(right.value, NodeValue::Operator(Op::Else));
    }
}
