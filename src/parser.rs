//! Recursive-descent parser over fully parenthesized lists.
//!
//! The head of every list selects the construct. Semantic actions run while
//! parsing: declarations are registered as soon as their names are read and
//! identifiers are resolved on the spot, because whether `(f x)` is a call
//! or a cast depends on what `f` already denotes. Scopes are opened through
//! `with_scope`, which pops on every exit path.
//!
//! Unresolved names, duplicate declarations and malformed headers are
//! recorded and parsing carries on with a best-effort node. Unrecognized
//! list syntax is fatal.

use log::debug;

use crate::ast::{BinOp, IntegerLiteral, IntegerValue, Node, NodeKind, Program};
use crate::diagnostic::{Location, Reporter};
use crate::error::{CompileError, CompileResult};
use crate::symbol::{Param, Symbol, SymbolId, SymbolKind, SymbolTable, SymbolTag};
use crate::tokenizer::{Token, TokenKind, TokenStream};
use crate::ty::{Builtin, TypeId, TypeTable};

/// Parse a whole compilation unit.
pub fn parse(
  tokens: Vec<Token>,
  types: &mut TypeTable,
  symbols: &mut SymbolTable,
  reporter: &mut Reporter,
) -> CompileResult<Program> {
  let mut parser = Parser {
    stream: TokenStream::new(tokens),
    types,
    symbols,
    reporter,
    function: None,
    function_depth: 0,
  };

  let mut items = Vec::new();
  let mut user_main = None;
  while !parser.stream.is_eof() {
    let node = parser.parse_list()?;
    if let NodeKind::FunctionDef { .. } = node.kind
      && let Some(id) = node.symbol
      && parser.symbols.get(id).name == "main"
    {
      user_main = Some(node.location);
    }
    items.push(node);
  }

  let program = Program { items };
  if let Some(location) = user_main
    && program.has_toplevel_statements()
  {
    parser.reporter.error(
      location,
      "'main' is defined while top-level statements are present",
    );
  }

  debug_assert_eq!(parser.symbols.depth(), 1, "unbalanced scope stack");
  debug!(
    "parsed {} top-level items, {} symbols, {} types",
    program.items.len(),
    parser.symbols.len(),
    parser.types.len()
  );
  Ok(program)
}

struct Parser<'a> {
  stream: TokenStream,
  types: &'a mut TypeTable,
  symbols: &'a mut SymbolTable,
  reporter: &'a mut Reporter,
  /// Function whose body is being parsed.
  function: Option<SymbolId>,
  function_depth: usize,
}

impl Parser<'_> {
  fn expect(&mut self, kind: TokenKind) -> CompileResult<Token> {
    self.stream.expect(kind, self.reporter)
  }

  fn unexpected(&self, token: &Token) -> CompileError {
    self
      .reporter
      .fatal(token.location, format!("unexpected {}", token.describe()))
  }

  fn at(&self, kind: TokenKind) -> bool {
    self.stream.peek(0).kind == kind
  }

  /// Run `f` inside a fresh scope; the scope is popped whatever `f` returns.
  fn with_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
    self.symbols.push_scope();
    let depth = self.symbols.depth();
    let result = f(self);
    debug_assert_eq!(self.symbols.depth(), depth, "unbalanced scope stack");
    self.symbols.pop_scope();
    result
  }

  fn parse_list(&mut self) -> CompileResult<Node> {
    let open = self.expect(TokenKind::LParen)?;
    let location = open.location;
    let head = self.stream.peek(0).clone();

    let node = match head.kind {
      TokenKind::LParen => self.parse_block(location)?,
      TokenKind::RParen => Node::empty(location),
      TokenKind::Operator => self.parse_binop(location)?,
      TokenKind::Ident => self.parse_call_or_cast(location)?,
      TokenKind::Type => {
        self.stream.consume();
        let target = self.builtin_type(&head)?;
        self.parse_cast(location, target)?
      }
      TokenKind::Keyword => match head.text.as_str() {
        "let" => self.parse_let(location)?,
        "exfun" => self.parse_exfun(location)?,
        "defun" => self.parse_defun(location)?,
        "if" => self.parse_if(location)?,
        "else" => self.parse_stray_else(location)?,
        "while" => self.parse_while(location)?,
        "for" => self.parse_for(location)?,
        "typedef" => self.parse_typedef(location)?,
        "return" => self.parse_return(location)?,
        _ => return Err(self.unexpected(&head)),
      },
      _ => return Err(self.unexpected(&head)),
    };

    self.expect(TokenKind::RParen)?;
    Ok(node)
  }

  /// Lists up to the closing paren of the enclosing list.
  fn parse_statements(&mut self) -> CompileResult<Vec<Node>> {
    let mut stmts = Vec::new();
    while !self.at(TokenKind::RParen) {
      stmts.push(self.parse_list()?);
    }
    Ok(stmts)
  }

  /// Items up to the closing paren of the enclosing list.
  fn parse_items(&mut self) -> CompileResult<Vec<Node>> {
    let mut items = Vec::new();
    while !self.at(TokenKind::RParen) {
      items.push(self.parse_item()?);
    }
    Ok(items)
  }

  fn parse_item(&mut self) -> CompileResult<Node> {
    let token = self.stream.peek(0).clone();
    match token.kind {
      TokenKind::LParen => self.parse_list(),
      TokenKind::Integer => {
        self.stream.consume();
        self.parse_integer(&token)
      }
      TokenKind::Keyword if token.text == "true" || token.text == "false" => {
        self.stream.consume();
        Ok(Node::new(token.location, NodeKind::Boolean(token.text == "true")))
      }
      TokenKind::Ident => {
        self.stream.consume();
        Ok(self.parse_var_ref(&token))
      }
      _ => Err(self.unexpected(&token)),
    }
  }

  fn parse_integer(&self, token: &Token) -> CompileResult<Node> {
    let text = token.text.as_str();
    let value = match text.strip_suffix('u') {
      Some(digits) if digits.starts_with('-') => {
        return Err(
          self
            .reporter
            .fatal(token.location, format!("unsigned literal '{text}' is negative")),
        );
      }
      Some(digits) => digits.parse::<u64>().map(IntegerValue::Unsigned),
      None => text.parse::<i64>().map(IntegerValue::Signed),
    }
    .map_err(|err| {
      self
        .reporter
        .fatal(token.location, format!("invalid integer literal '{text}': {err}"))
    })?;

    Ok(Node::new(
      token.location,
      NodeKind::Integer(IntegerLiteral { value, bits: 64 }),
    ))
  }

  fn parse_var_ref(&mut self, token: &Token) -> Node {
    let name = token.text.as_str();
    let Some(id) = self.symbols.resolve(name) else {
      self
        .reporter
        .error(token.location, format!("'{name}' is not declared"));
      return Node::new(token.location, NodeKind::VarRef);
    };

    let SymbolKind::LocalVar { function, .. } = self.symbols.get(id).kind else {
      self
        .reporter
        .error(token.location, format!("'{name}' is not a variable"));
      return Node::new(token.location, NodeKind::VarRef);
    };

    if function != self.function {
      self.reporter.error(
        token.location,
        format!("variable '{name}' belongs to another function's frame"),
      );
    }
    Node::with_symbol(token.location, Some(id), NodeKind::VarRef)
  }

  fn parse_block(&mut self, location: Location) -> CompileResult<Node> {
    let body = self.with_scope(|p| p.parse_statements())?;
    Ok(Node::new(location, NodeKind::Scope(body)))
  }

  fn parse_binop(&mut self, location: Location) -> CompileResult<Node> {
    let operator = self.stream.consume();
    let op = BinOp::from_operator(&operator.text).ok_or_else(|| self.unexpected(&operator))?;

    let operands = self.parse_items()?;
    if operands.len() != 2 {
      self.reporter.error(
        location,
        format!(
          "'{}' expects 2 operands, got {}",
          operator.text,
          operands.len()
        ),
      );
    }

    let mut operands = operands.into_iter();
    let lhs = operands.next().unwrap_or_else(|| Node::empty(location));
    let rhs = operands.next().unwrap_or_else(|| Node::empty(location));
    Ok(Node::new(
      location,
      NodeKind::BinOp {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
    ))
  }

  fn parse_call_or_cast(&mut self, location: Location) -> CompileResult<Node> {
    let head = self.stream.consume();
    let resolved = self
      .symbols
      .resolve(&head.text)
      .map(|id| (id, self.symbols.get(id).tag()));

    match resolved {
      Some((id, SymbolTag::Type)) => {
        let target = self.symbols.get(id).ty();
        self.parse_cast(location, target)
      }
      Some((id, SymbolTag::Function)) => {
        let args = self.parse_items()?;
        Ok(Node::with_symbol(
          location,
          Some(id),
          NodeKind::FunctionCall { args },
        ))
      }
      Some((_, SymbolTag::LocalVar)) => {
        self.reporter.error(
          head.location,
          format!("'{}' is not a function or a type", head.text),
        );
        let args = self.parse_items()?;
        Ok(Node::new(location, NodeKind::FunctionCall { args }))
      }
      None => {
        self
          .reporter
          .error(head.location, format!("'{}' is not declared", head.text));
        let args = self.parse_items()?;
        Ok(Node::new(location, NodeKind::FunctionCall { args }))
      }
    }
  }

  fn parse_cast(&mut self, location: Location, target: TypeId) -> CompileResult<Node> {
    let operands = self.parse_items()?;
    if operands.len() != 1 {
      self.reporter.error(
        location,
        format!("cast expects 1 operand, got {}", operands.len()),
      );
    }
    let expr = operands
      .into_iter()
      .next()
      .unwrap_or_else(|| Node::empty(location));
    Ok(Node::new(
      location,
      NodeKind::Cast {
        target,
        expr: Box::new(expr),
      },
    ))
  }

  fn builtin_type(&mut self, token: &Token) -> CompileResult<TypeId> {
    let builtin = Builtin::from_name(&token.text).ok_or_else(|| self.unexpected(token))?;
    Ok(self.types.register_builtin(builtin))
  }

  fn parse_type(&mut self) -> CompileResult<TypeId> {
    let token = self.stream.peek(0).clone();
    match token.kind {
      TokenKind::Type => {
        self.stream.consume();
        self.builtin_type(&token)
      }
      TokenKind::Ident => {
        self.stream.consume();
        match self.symbols.resolve_with_tag(&token.text, SymbolTag::Type) {
          Some(id) => Ok(self.symbols.get(id).ty()),
          None => {
            self.reporter.error(
              token.location,
              format!("type '{}' is not declared", token.text),
            );
            Ok(self.types.builtin(Builtin::Void))
          }
        }
      }
      TokenKind::LParen if self.stream.peek(1).is(TokenKind::Keyword, "struct") => {
        self.parse_struct_type()
      }
      _ => Err(self.reporter.fatal(
        token.location,
        format!("expected type, got {}", token.describe()),
      )),
    }
  }

  fn parse_struct_type(&mut self) -> CompileResult<TypeId> {
    self.expect(TokenKind::LParen)?;
    self.stream.consume();

    let mut fields: Vec<(String, TypeId)> = Vec::new();
    while !self.at(TokenKind::RParen) {
      let name = self.expect(TokenKind::Ident)?;
      self.expect(TokenKind::Colon)?;
      let ty = self.parse_type()?;
      if fields.iter().any(|(field, _)| *field == name.text) {
        self.reporter.error(
          name.location,
          format!("duplicate field '{}' in struct", name.text),
        );
        continue;
      }
      fields.push((name.text, ty));
    }
    self.expect(TokenKind::RParen)?;

    Ok(self.types.register_struct(fields))
  }

  /// `(` (name `:` type)* `)`
  fn parse_params(&mut self) -> CompileResult<Vec<(Token, TypeId)>> {
    self.expect(TokenKind::LParen)?;
    let mut params = Vec::new();
    while !self.at(TokenKind::RParen) {
      let name = self.expect(TokenKind::Ident)?;
      self.expect(TokenKind::Colon)?;
      let ty = self.parse_type()?;
      params.push((name, ty));
    }
    self.expect(TokenKind::RParen)?;
    Ok(params)
  }

  fn declare_variable(&mut self, name: &Token, ty: TypeId) -> Option<SymbolId> {
    let function = self.function;
    let Some(id) = self.symbols.declare(&name.text, SymbolTag::LocalVar) else {
      self.reporter.error(
        name.location,
        format!("'{}' is already declared in this scope", name.text),
      );
      return None;
    };
    let symbol = self.symbols.get_mut(id);
    symbol.ty = Some(ty);
    symbol.kind = SymbolKind::LocalVar {
      offset: None,
      function,
    };
    Some(id)
  }

  fn declare_function(&mut self, name: &Token) -> Option<SymbolId> {
    let id = self.symbols.declare(&name.text, SymbolTag::Function);
    if id.is_none() {
      self.reporter.error(
        name.location,
        format!("'{}' is already declared in this scope", name.text),
      );
    }
    id
  }

  fn parse_let(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    let ty = self.parse_type()?;
    let name = self.expect(TokenKind::Ident)?;
    let id = self.declare_variable(&name, ty);
    Ok(Node::with_symbol(location, id, NodeKind::VarDecl))
  }

  fn parse_typedef(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    let name = self.expect(TokenKind::Ident)?;
    let underlying = self.parse_type()?;
    let defined = self.types.register_definition(&name.text, underlying);

    let id = self.symbols.declare(&name.text, SymbolTag::Type);
    match id {
      Some(id) => self.symbols.get_mut(id).ty = Some(defined),
      None => self.reporter.error(
        name.location,
        format!("'{}' is already declared in this scope", name.text),
      ),
    }
    Ok(Node::with_symbol(location, id, NodeKind::TypedefDecl))
  }

  fn parse_exfun(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    let name = self.expect(TokenKind::Ident)?;
    let id = self.declare_function(&name);

    let prototyped = self.at(TokenKind::LParen);
    let (params, ret) = if prototyped {
      let params = self
        .parse_params()?
        .into_iter()
        .map(|(name, ty)| Param {
          name: name.text,
          ty,
        })
        .collect();
      (params, self.parse_type()?)
    } else {
      (Vec::new(), self.types.builtin(Builtin::Void))
    };

    if let Some(id) = id {
      self.symbols.set(
        id,
        Symbol {
          name: name.text,
          ty: Some(ret),
          kind: SymbolKind::Function {
            params,
            prototyped,
            external: true,
          },
        },
      );
    }
    Ok(Node::with_symbol(location, id, NodeKind::ExternFunctionDecl))
  }

  fn parse_defun(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    let name = self.expect(TokenKind::Ident)?;
    if self.function_depth > 0 {
      self.reporter.error(
        name.location,
        format!("function '{}' is nested in another function", name.text),
      );
    } else if self.symbols.depth() > 1 {
      self.reporter.error(
        name.location,
        format!("function '{}' must be defined at top level", name.text),
      );
    }

    // Declared in the enclosing scope so that callers and the body itself
    // can resolve it.
    let id = self.declare_function(&name);
    let outer = std::mem::replace(&mut self.function, id);
    self.function_depth += 1;

    let result = self.with_scope(|p| {
      let mut signature = Vec::new();
      let mut params = Vec::new();
      for (param, ty) in p.parse_params()? {
        signature.push(Param {
          name: param.text.clone(),
          ty,
        });
        if let Some(param_id) = p.declare_variable(&param, ty) {
          params.push(param_id);
        }
      }

      let ret = p.parse_type()?;
      if let Some(id) = id {
        p.symbols.set(
          id,
          Symbol {
            name: name.text.clone(),
            ty: Some(ret),
            kind: SymbolKind::Function {
              params: signature,
              prototyped: true,
              external: false,
            },
          },
        );
      }

      let body = p.parse_statements()?;
      Ok((params, body))
    });

    self.function_depth -= 1;
    self.function = outer;
    let (params, body) = result?;
    Ok(Node::with_symbol(
      location,
      id,
      NodeKind::FunctionDef { params, body },
    ))
  }

  fn parse_return(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    let value = if self.at(TokenKind::RParen) {
      None
    } else {
      Some(Box::new(self.parse_item()?))
    };

    match self.function {
      Some(function) => Ok(Node::new(location, NodeKind::Return { value, function })),
      None => {
        if self.function_depth == 0 {
          self
            .reporter
            .error(location, "'return' outside of a function");
        }
        Ok(Node::empty(location))
      }
    }
  }

  fn at_else(&self) -> bool {
    self.at(TokenKind::LParen) && self.stream.peek(1).is(TokenKind::Keyword, "else")
  }

  fn parse_if(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    let cond = self.parse_item()?;

    let then_body = self.with_scope(|p| {
      let mut stmts = Vec::new();
      while !p.at(TokenKind::RParen) && !p.at_else() {
        stmts.push(p.parse_list()?);
      }
      Ok(stmts)
    })?;

    let else_body = if self.at_else() {
      self.stream.consume();
      self.stream.consume();
      let body = self.with_scope(|p| p.parse_statements())?;
      self.expect(TokenKind::RParen)?;
      Some(body)
    } else {
      None
    };

    Ok(Node::new(
      location,
      NodeKind::If {
        cond: Box::new(cond),
        then_body,
        else_body,
      },
    ))
  }

  fn parse_stray_else(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    self
      .reporter
      .error(location, "'else' without a matching 'if'");
    let body = self.with_scope(|p| p.parse_statements())?;
    Ok(Node::new(location, NodeKind::Scope(body)))
  }

  fn parse_while(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    let cond = self.parse_item()?;
    let body = self.with_scope(|p| p.parse_statements())?;
    Ok(Node::new(
      location,
      NodeKind::While {
        cond: Box::new(cond),
        body,
      },
    ))
  }

  fn parse_for(&mut self, location: Location) -> CompileResult<Node> {
    self.stream.consume();
    // The loop variable is visible to all four parts.
    let kind = self.with_scope(|p| {
      let init = p.parse_item()?;
      let cond = p.parse_item()?;
      let step = p.parse_item()?;
      let body = p.parse_statements()?;
      Ok(NodeKind::For {
        init: Box::new(init),
        cond: Box::new(cond),
        step: Box::new(step),
        body,
      })
    })?;
    Ok(Node::new(location, kind))
  }
}
