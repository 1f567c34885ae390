//! The closed operator enumeration (§3 Data Model: "Token ... `op` is drawn
//! from a fixed closed enumeration") and its static descriptor table.
//!
//! `Op` values are reused for two purposes with the same identity, exactly
//! as the grammar does: as a `Token` tag coming out of the lexer, and as the
//! `value` of an `Operator`-kind AST node. A handful of variants
//! (`FuncHeader`, `FuncDecl`, `Sep`) never come out of the lexer — they are
//! synthesized by the parser's sugar transformations (§4.2) and only ever
//! appear as AST node kinds.

use derive_more::Display;

/// How many AST children an operator node has, and in which source-token
/// shape it is written. Not used for code generation (the IR builder
/// switches on `Op` directly); kept because the spec calls it out as part
/// of the operator descriptor and the AST pretty-printer uses it to decide
/// how many subtrees to visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Nullary,
    Unary,
    Binary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum Op {
    // arithmetic, binary
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("^")]
    Pow,
    // arithmetic, unary function form
    #[display("sqrt")]
    Sqrt,
    #[display("sin")]
    Sin,
    #[display("cos")]
    Cos,
    // comparisons, binary
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("<=")]
    Le,
    #[display(">=")]
    Ge,
    #[display("==")]
    Eq,
    #[display("!=")]
    Neq,
    // control
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    // declarations
    #[display("Transaction")]
    Transaction,
    #[display("Account")]
    Account,
    // I/O
    #[display("Invest")]
    Invest,
    #[display("ShowBalance")]
    ShowBalance,
    #[display("Txt")]
    Txt,
    #[display("Pay")]
    Pay,
    // assignment
    #[display("=")]
    Assign,
    // punctuation
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("->")]
    Arrow,
    #[display("\"")]
    Quote,
    #[display(",")]
    Comma,
    #[display("$")]
    Dollar,
    #[display("\u{20BD}")]
    Ruble,
    #[display("%")]
    Percent,
    // synthetic: never produced by the lexer
    #[display("EOF")]
    Eof,
    #[display("CALL")]
    Call,
    #[display("FUNC_HEADER")]
    FuncHeader,
    #[display("FUNC_DECL")]
    FuncDecl,
    #[display("SEP")]
    Sep,
}

pub struct OpDescriptor {
    pub arity: Arity,
    /// The lexeme this operator is recognized from in source text. Empty
    /// for synthetic operators that never come from the lexer.
    pub lexeme: &'static str,
    /// Precedence used when reverse-printing an expression tree back to
    /// source-like text (higher binds tighter). Irrelevant for non-expression
    /// operators, which are all given precedence 0.
    pub precedence: u8,
    /// Parenthesized call form, e.g. `sqrt(x)`.
    pub is_function: bool,
    /// The symbolic name this operator is written under in the AST file
    /// format (§4.3); distinct from `lexeme` (`Transaction` the keyword vs.
    /// `TRANSACTION` the dump name).
    pub op_name: &'static str,
}

impl Op {
    pub const fn descriptor(self) -> OpDescriptor {
        use Arity::*;
        use Op::*;
        match self {
            Add => OpDescriptor { arity: Binary, lexeme: "+", precedence: 3, is_function: false, op_name: "ADD" },
            Sub => OpDescriptor { arity: Binary, lexeme: "-", precedence: 3, is_function: false, op_name: "SUB" },
            Mul => OpDescriptor { arity: Binary, lexeme: "*", precedence: 4, is_function: false, op_name: "MUL" },
            Div => OpDescriptor { arity: Binary, lexeme: "/", precedence: 4, is_function: false, op_name: "DIV" },
            Pow => OpDescriptor { arity: Binary, lexeme: "^", precedence: 5, is_function: false, op_name: "POW" },
            Sqrt => OpDescriptor { arity: Unary, lexeme: "sqrt", precedence: 6, is_function: true, op_name: "SQRT" },
            Sin => OpDescriptor { arity: Unary, lexeme: "sin", precedence: 6, is_function: true, op_name: "SIN" },
            Cos => OpDescriptor { arity: Unary, lexeme: "cos", precedence: 6, is_function: true, op_name: "COS" },
            Lt => OpDescriptor { arity: Binary, lexeme: "<", precedence: 2, is_function: false, op_name: "LT" },
            Gt => OpDescriptor { arity: Binary, lexeme: ">", precedence: 2, is_function: false, op_name: "GT" },
            Le => OpDescriptor { arity: Binary, lexeme: "<=", precedence: 2, is_function: false, op_name: "LE" },
            Ge => OpDescriptor { arity: Binary, lexeme: ">=", precedence: 2, is_function: false, op_name: "GE" },
            Eq => OpDescriptor { arity: Binary, lexeme: "==", precedence: 2, is_function: false, op_name: "EQ" },
            Neq => OpDescriptor { arity: Binary, lexeme: "!=", precedence: 2, is_function: false, op_name: "NEQ" },
            If => OpDescriptor { arity: Binary, lexeme: "if", precedence: 0, is_function: false, op_name: "IF" },
            Else => OpDescriptor { arity: Binary, lexeme: "else", precedence: 0, is_function: false, op_name: "ELSE" },
            While => OpDescriptor { arity: Binary, lexeme: "while", precedence: 0, is_function: false, op_name: "WHILE" },
            Transaction => OpDescriptor { arity: Binary, lexeme: "Transaction", precedence: 0, is_function: false, op_name: "TRANSACTION" },
            Account => OpDescriptor { arity: Unary, lexeme: "Account", precedence: 0, is_function: false, op_name: "ACCOUNT" },
            Invest => OpDescriptor { arity: Unary, lexeme: "Invest", precedence: 0, is_function: false, op_name: "INVEST" },
            ShowBalance => OpDescriptor { arity: Unary, lexeme: "ShowBalance", precedence: 0, is_function: false, op_name: "SHOW_BALANCE" },
            Txt => OpDescriptor { arity: Unary, lexeme: "Txt", precedence: 0, is_function: false, op_name: "TXT" },
            Pay => OpDescriptor { arity: Unary, lexeme: "Pay", precedence: 0, is_function: false, op_name: "PAY" },
            Assign => OpDescriptor { arity: Binary, lexeme: "=", precedence: 1, is_function: false, op_name: "ASSIGN" },
            LParen => OpDescriptor { arity: Nullary, lexeme: "(", precedence: 0, is_function: false, op_name: "LPAREN" },
            RParen => OpDescriptor { arity: Nullary, lexeme: ")", precedence: 0, is_function: false, op_name: "RPAREN" },
            Arrow => OpDescriptor { arity: Nullary, lexeme: "->", precedence: 0, is_function: false, op_name: "ARROW" },
            Quote => OpDescriptor { arity: Nullary, lexeme: "\"", precedence: 0, is_function: false, op_name: "QUOTE" },
            Comma => OpDescriptor { arity: Binary, lexeme: ",", precedence: 0, is_function: false, op_name: "COMMA" },
            Dollar => OpDescriptor { arity: Nullary, lexeme: "$", precedence: 0, is_function: false, op_name: "DOLLAR" },
            Ruble => OpDescriptor { arity: Nullary, lexeme: "\u{20BD}", precedence: 0, is_function: false, op_name: "RUBLE" },
            Percent => OpDescriptor { arity: Nullary, lexeme: "%", precedence: 0, is_function: false, op_name: "PERCENT" },
            Eof => OpDescriptor { arity: Nullary, lexeme: "", precedence: 0, is_function: false, op_name: "EOF" },
            Call => OpDescriptor { arity: Binary, lexeme: "", precedence: 7, is_function: false, op_name: "CALL" },
            FuncHeader => OpDescriptor { arity: Binary, lexeme: "", precedence: 0, is_function: false, op_name: "FUNC_HEADER" },
            FuncDecl => OpDescriptor { arity: Binary, lexeme: "", precedence: 0, is_function: false, op_name: "FUNC_DECL" },
            Sep => OpDescriptor { arity: Binary, lexeme: "", precedence: 0, is_function: false, op_name: "SEP" },
        }
    }

    pub fn op_name(self) -> &'static str {
        self.descriptor().op_name
    }

    pub fn is_function(self) -> bool {
        self.descriptor().is_function
    }

    pub fn precedence(self) -> u8 {
        self.descriptor().precedence
    }

    /// Parse a symbolic AST-file name (e.g. `"ADD"`) back into an `Op`, the
    /// inverse of `op_name`. Used by the AST reader (§4.3).
    pub fn from_op_name(name: &str) -> Option<Op> {
        use Op::*;
        Some(match name {
            "ADD" => Add,
            "SUB" => Sub,
            "MUL" => Mul,
            "DIV" => Div,
            "POW" => Pow,
            "SQRT" => Sqrt,
            "SIN" => Sin,
            "COS" => Cos,
            "LT" => Lt,
            "GT" => Gt,
            "LE" => Le,
            "GE" => Ge,
            "EQ" => Eq,
            "NEQ" => Neq,
            "IF" => If,
            "ELSE" => Else,
            "WHILE" => While,
            "TRANSACTION" => Transaction,
            "ACCOUNT" => Account,
            "INVEST" => Invest,
            "SHOW_BALANCE" => ShowBalance,
            "TXT" => Txt,
            "PAY" => Pay,
            "ASSIGN" => Assign,
            "LPAREN" => LParen,
            "RPAREN" => RParen,
            "ARROW" => Arrow,
            "QUOTE" => Quote,
            "COMMA" => Comma,
            "DOLLAR" => Dollar,
            "RUBLE" => Ruble,
            "PERCENT" => Percent,
            "EOF" => Eof,
            "CALL" => Call,
            "FUNC_HEADER" => FuncHeader,
            "FUNC_DECL" => FuncDecl,
            "SEP" => Sep,
            _ => return None,
        })
    }

    /// The fixed table of operators the lexer attempts a longest-match
    /// against, in the order ties should favor (longer lexemes are tried
    /// first by the lexer regardless of table order, but keyword-looking
    /// lexemes are listed before their prefixes for readability).
    pub const LEXER_TABLE: &'static [Op] = &[
        Op::Transaction,
        Op::Account,
        Op::Invest,
        Op::ShowBalance,
        Op::Txt,
        Op::Pay,
        Op::If,
        Op::Else,
        Op::While,
        Op::Sqrt,
        Op::Sin,
        Op::Cos,
        Op::Le,
        Op::Ge,
        Op::Eq,
        Op::Neq,
        Op::Arrow,
        Op::Lt,
        Op::Gt,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Pow,
        Op::Assign,
        Op::LParen,
        Op::RParen,
        Op::Quote,
        Op::Comma,
        Op::Dollar,
        Op::Ruble,
        Op::Percent,
    ];
}
