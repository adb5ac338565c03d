pub mod asm {
    use std::collections::HashMap;

    use crate::engine::engine::opcode::*;

    /// Assemble a user program. The image is position dependent and meant
    /// to be loaded at offset 0 of a process segment.
    pub fn assemble(source: &str) -> Result<Vec<u8>, String> {
        Assembler::new().assemble(source)
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Token {
        Ident(String),
        Number(u32),
        Str(String),
        Sym(&'static str),
    }

    #[derive(Debug, Clone)]
    enum Expr {
        Num(u32),
        Label(String),
    }

    #[derive(Debug, Clone, Copy)]
    struct Reg(u8);

    #[derive(Debug, Clone)]
    enum Operand {
        Reg(Reg),
        Imm(Expr),
        Mem(Reg),
    }

    #[derive(Debug, Clone, Copy)]
    enum Cond {
        Eq,
        Ne,
        Lt,
        Ge,
        Le,
        Gt,
    }

    #[derive(Debug, Clone)]
    enum Instr {
        Nop,
        Ret,
        Hlt,
        Cli,
        Sti,
        Mov(Operand, Operand),
        MovB(Operand, Operand),
        Alu(u8, Reg, Operand),
        Inc(Reg),
        Dec(Reg),
        Push(Reg),
        Pop(Reg),
        Call(Expr),
        Jmp(Expr),
        Jcc(Cond, Expr),
        Int(Expr),
        RdRand(Reg),
    }

    #[derive(Debug, Clone)]
    enum Stmt {
        Byte(Vec<Expr>),
        Long(Vec<Expr>),
        Space(u32),
        Ascii(Vec<u8>),
        Instr(Instr),
    }

    #[derive(Debug, Clone)]
    struct StmtLine {
        addr: u32,
        line_no: usize,
        stmt: Stmt,
    }

    // alu mnemonics: (reg-reg opcode, 0x81 group op)
    const ALU_OPS: [(&str, u8, u8); 6] = [
        ("add", ADD, GRP_ADD),
        ("sub", SUB, GRP_SUB),
        ("cmp", CMP, GRP_CMP),
        ("and", AND, GRP_AND),
        ("or", OR, GRP_OR),
        ("xor", XOR, GRP_XOR),
    ];

    const REGS: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];

    pub struct Assembler {
        labels: HashMap<String, u32>,
        lines: Vec<StmtLine>,
    }

    impl Default for Assembler {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Assembler {
        pub fn new() -> Self {
            Self {
                labels: HashMap::new(),
                lines: Vec::new(),
            }
        }

        pub fn assemble(&mut self, source: &str) -> Result<Vec<u8>, String> {
            self.first_pass(source)?;
            self.second_pass()
        }

        /// Address of a label or value of an `.equ`, after assembling.
        pub fn symbol(&self, name: &str) -> Option<u32> {
            self.labels.get(name).copied()
        }

        fn first_pass(&mut self, source: &str) -> Result<(), String> {
            let mut pc = 0u32;

            for (idx, raw_line) in source.lines().enumerate() {
                let line_no = idx + 1;
                let line = strip_comments(raw_line).map_err(|err| format!("line {line_no}: {err}"))?;
                let tokens = tokenize(line.trim()).map_err(|err| format!("line {line_no}: {err}"))?;
                if tokens.is_empty() {
                    continue;
                }

                let mut rest = tokens.as_slice();
                while let [Token::Ident(name), Token::Sym(":"), tail @ ..] = rest {
                    self.insert_label(name, pc, line_no)?;
                    rest = tail;
                }
                if rest.is_empty() {
                    continue;
                }

                if matches!(&rest[0], Token::Ident(kw) if kw == ".equ") {
                    let (name, value) = parse_equ(rest).map_err(|err| format!("line {line_no}: {err}"))?;
                    self.insert_label(&name, value, line_no)?;
                    continue;
                }

                let stmt = parse_stmt(rest).map_err(|err| format!("line {line_no}: {err}"))?;
                let size = stmt_size(&stmt);
                self.lines.push(StmtLine { addr: pc, line_no, stmt });
                pc = pc
                    .checked_add(size)
                    .ok_or_else(|| format!("line {line_no}: address overflow"))?;
            }

            Ok(())
        }

        fn second_pass(&self) -> Result<Vec<u8>, String> {
            let mut output = Vec::new();

            for line in &self.lines {
                let bytes = self.emit_stmt(&line.stmt, line.addr, line.line_no)?;
                if output.len() as u32 != line.addr {
                    return Err(format!("line {}: size mismatch while emitting", line.line_no));
                }
                output.extend(bytes);
            }

            Ok(output)
        }

        fn emit_stmt(&self, stmt: &Stmt, addr: u32, line_no: usize) -> Result<Vec<u8>, String> {
            match stmt {
                Stmt::Byte(values) => {
                    let mut out = Vec::new();
                    for expr in values {
                        let val = self.resolve_expr(expr, line_no)?;
                        if val > 0xff && !(-128..0).contains(&(val as i32)) {
                            return Err(format!("line {line_no}: byte value {val:#x} too large"));
                        }
                        out.push(val as u8);
                    }
                    Ok(out)
                }
                Stmt::Long(values) => {
                    let mut out = Vec::new();
                    for expr in values {
                        out.extend(self.resolve_expr(expr, line_no)?.to_le_bytes());
                    }
                    Ok(out)
                }
                Stmt::Space(count) => Ok(vec![0u8; *count as usize]),
                Stmt::Ascii(bytes) => Ok(bytes.clone()),
                Stmt::Instr(instr) => self.emit_instr(instr, addr, line_no),
            }
        }

        fn emit_instr(&self, instr: &Instr, addr: u32, line_no: usize) -> Result<Vec<u8>, String> {
            let end = addr + instr_size(instr);
            let rel = |target: &Expr| -> Result<[u8; 4], String> {
                let target = self.resolve_expr(target, line_no)?;
                Ok(target.wrapping_sub(end).to_le_bytes())
            };

            let out = match instr {
                Instr::Nop => vec![NOP],
                Instr::Ret => vec![RET],
                Instr::Hlt => vec![HLT],
                Instr::Cli => vec![CLI],
                Instr::Sti => vec![STI],
                Instr::Mov(dst, src) => match (dst, src) {
                    (Operand::Reg(d), Operand::Imm(expr)) => {
                        let mut out = vec![MOV_IMM + d.0];
                        out.extend(self.resolve_expr(expr, line_no)?.to_le_bytes());
                        out
                    }
                    (Operand::Reg(d), Operand::Reg(s)) => vec![MOV, rr(*d, *s)],
                    (Operand::Reg(d), Operand::Mem(s)) => vec![LOAD, rr(*d, *s)],
                    (Operand::Mem(d), Operand::Reg(s)) => vec![STORE, rr(*d, *s)],
                    _ => return Err(format!("line {line_no}: unsupported mov operands")),
                },
                Instr::MovB(dst, src) => match (dst, src) {
                    (Operand::Reg(d), Operand::Mem(s)) => vec![LOADB, rr(*d, *s)],
                    (Operand::Mem(d), Operand::Reg(s)) => vec![STOREB, rr(*d, *s)],
                    _ => return Err(format!("line {line_no}: movb needs one memory operand")),
                },
                Instr::Alu(idx, dst, src) => {
                    let (_, reg_op, grp_op) = ALU_OPS[*idx as usize];
                    match src {
                        Operand::Reg(s) => vec![reg_op, rr(*dst, *s)],
                        Operand::Imm(expr) => {
                            let mut out = vec![GRP_IMM, (grp_op << 4) | dst.0];
                            out.extend(self.resolve_expr(expr, line_no)?.to_le_bytes());
                            out
                        }
                        Operand::Mem(_) => {
                            return Err(format!("line {line_no}: arithmetic on memory is not supported"));
                        }
                    }
                }
                Instr::Inc(r) => vec![INC + r.0],
                Instr::Dec(r) => vec![DEC + r.0],
                Instr::Push(r) => vec![PUSH + r.0],
                Instr::Pop(r) => vec![POP + r.0],
                Instr::Call(target) => [vec![CALL], rel(target)?.to_vec()].concat(),
                Instr::Jmp(target) => [vec![JMP], rel(target)?.to_vec()].concat(),
                Instr::Jcc(cond, target) => {
                    let op = match cond {
                        Cond::Eq => JE,
                        Cond::Ne => JNE,
                        Cond::Lt => JL,
                        Cond::Ge => JGE,
                        Cond::Le => JLE,
                        Cond::Gt => JG,
                    };
                    [vec![ESCAPE, op], rel(target)?.to_vec()].concat()
                }
                Instr::Int(expr) => {
                    let vector = self.resolve_expr(expr, line_no)?;
                    if vector > 0xff {
                        return Err(format!("line {line_no}: interrupt vector {vector:#x} too large"));
                    }
                    vec![INT, vector as u8]
                }
                Instr::RdRand(r) => vec![ESCAPE, RDRAND, 0xf0 | r.0],
            };

            Ok(out)
        }

        fn resolve_expr(&self, expr: &Expr, line_no: usize) -> Result<u32, String> {
            match expr {
                Expr::Num(val) => Ok(*val),
                Expr::Label(name) => self
                    .labels
                    .get(name)
                    .copied()
                    .ok_or_else(|| format!("line {line_no}: unknown label '{name}'")),
            }
        }

        fn insert_label(&mut self, name: &str, addr: u32, line_no: usize) -> Result<(), String> {
            if self.labels.contains_key(name) {
                return Err(format!("line {line_no}: duplicate label '{name}'"));
            }
            self.labels.insert(name.to_string(), addr);
            Ok(())
        }
    }

    fn rr(dst: Reg, src: Reg) -> u8 {
        (dst.0 << 4) | src.0
    }

    fn stmt_size(stmt: &Stmt) -> u32 {
        match stmt {
            Stmt::Byte(values) => values.len() as u32,
            Stmt::Long(values) => values.len() as u32 * 4,
            Stmt::Space(count) => *count,
            Stmt::Ascii(bytes) => bytes.len() as u32,
            Stmt::Instr(instr) => instr_size(instr),
        }
    }

    fn instr_size(instr: &Instr) -> u32 {
        match instr {
            Instr::Nop | Instr::Ret | Instr::Hlt | Instr::Cli | Instr::Sti => 1,
            Instr::Inc(_) | Instr::Dec(_) | Instr::Push(_) | Instr::Pop(_) => 1,
            Instr::Mov(_, Operand::Imm(_)) => 5,
            Instr::Mov(..) | Instr::MovB(..) => 2,
            Instr::Alu(_, _, Operand::Imm(_)) => 6,
            Instr::Alu(..) => 2,
            Instr::Call(_) | Instr::Jmp(_) => 5,
            Instr::Jcc(..) => 6,
            Instr::Int(_) => 2,
            Instr::RdRand(_) => 3,
        }
    }

    fn parse_equ(tokens: &[Token]) -> Result<(String, u32), String> {
        match tokens {
            [_, Token::Ident(name), Token::Sym(","), Token::Number(value)] => Ok((name.clone(), *value)),
            _ => Err(".equ syntax is: .equ NAME, value".into()),
        }
    }

    fn parse_stmt(tokens: &[Token]) -> Result<Stmt, String> {
        let Token::Ident(keyword) = &tokens[0] else {
            return Err("expected a mnemonic or directive".into());
        };
        let args = &tokens[1..];

        match keyword.as_str() {
            ".byte" => Ok(Stmt::Byte(parse_expr_list(args)?)),
            ".long" => Ok(Stmt::Long(parse_expr_list(args)?)),
            ".space" => match args {
                [Token::Number(count)] => Ok(Stmt::Space(*count)),
                _ => Err(".space requires a numeric count".into()),
            },
            ".ascii" | ".asciz" => match args {
                [Token::Str(text)] => {
                    let mut bytes = text.as_bytes().to_vec();
                    if keyword == ".asciz" {
                        bytes.push(0);
                    }
                    Ok(Stmt::Ascii(bytes))
                }
                _ => Err(format!("{keyword} requires a single string literal")),
            },
            _ => Ok(Stmt::Instr(parse_instr(keyword, args)?)),
        }
    }

    fn parse_instr(mnemonic: &str, args: &[Token]) -> Result<Instr, String> {
        let operands = split_operands(args)?;
        let arity = |n: usize| -> Result<(), String> {
            if operands.len() == n {
                Ok(())
            } else {
                Err(format!("{mnemonic} takes {n} operand(s)"))
            }
        };

        let instr = match mnemonic {
            "nop" => arity(0).map(|_| Instr::Nop)?,
            "ret" => arity(0).map(|_| Instr::Ret)?,
            "hlt" => arity(0).map(|_| Instr::Hlt)?,
            "cli" => arity(0).map(|_| Instr::Cli)?,
            "sti" => arity(0).map(|_| Instr::Sti)?,
            "mov" | "movb" => {
                arity(2)?;
                let (dst, src) = (operands[0].clone(), operands[1].clone());
                if mnemonic == "mov" {
                    Instr::Mov(dst, src)
                } else {
                    Instr::MovB(dst, src)
                }
            }
            "inc" | "dec" | "push" | "pop" | "rdrand" => {
                arity(1)?;
                let Operand::Reg(r) = operands[0].clone() else {
                    return Err(format!("{mnemonic} needs a register"));
                };
                match mnemonic {
                    "inc" => Instr::Inc(r),
                    "dec" => Instr::Dec(r),
                    "push" => Instr::Push(r),
                    "pop" => Instr::Pop(r),
                    _ => Instr::RdRand(r),
                }
            }
            "call" | "jmp" | "je" | "jne" | "jl" | "jge" | "jle" | "jg" | "int" => {
                arity(1)?;
                let Operand::Imm(target) = operands[0].clone() else {
                    return Err(format!("{mnemonic} needs a label or number"));
                };
                match mnemonic {
                    "call" => Instr::Call(target),
                    "jmp" => Instr::Jmp(target),
                    "int" => Instr::Int(target),
                    "je" => Instr::Jcc(Cond::Eq, target),
                    "jne" => Instr::Jcc(Cond::Ne, target),
                    "jl" => Instr::Jcc(Cond::Lt, target),
                    "jge" => Instr::Jcc(Cond::Ge, target),
                    "jle" => Instr::Jcc(Cond::Le, target),
                    _ => Instr::Jcc(Cond::Gt, target),
                }
            }
            _ => {
                let Some(idx) = ALU_OPS.iter().position(|(name, _, _)| *name == mnemonic) else {
                    return Err(format!("unknown mnemonic '{mnemonic}'"));
                };
                arity(2)?;
                let Operand::Reg(dst) = operands[0].clone() else {
                    return Err(format!("{mnemonic} needs a register destination"));
                };
                Instr::Alu(idx as u8, dst, operands[1].clone())
            }
        };

        Ok(instr)
    }

    fn split_operands(tokens: &[Token]) -> Result<Vec<Operand>, String> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        tokens
            .split(|token| *token == Token::Sym(","))
            .map(parse_operand)
            .collect()
    }

    fn parse_operand(tokens: &[Token]) -> Result<Operand, String> {
        match tokens {
            [Token::Sym("["), Token::Ident(name), Token::Sym("]")] => {
                parse_reg(name).map(Operand::Mem).ok_or_else(|| format!("'{name}' is not a register"))
            }
            [Token::Ident(name)] => Ok(match parse_reg(name) {
                Some(reg) => Operand::Reg(reg),
                None => Operand::Imm(Expr::Label(name.clone())),
            }),
            [Token::Number(val)] => Ok(Operand::Imm(Expr::Num(*val))),
            [] => Err("missing operand".into()),
            _ => Err("malformed operand".into()),
        }
    }

    fn parse_reg(name: &str) -> Option<Reg> {
        REGS.iter().position(|reg| *reg == name).map(|idx| Reg(idx as u8))
    }

    fn parse_expr_list(tokens: &[Token]) -> Result<Vec<Expr>, String> {
        let mut out = Vec::new();
        for token in tokens {
            match token {
                Token::Sym(",") => {}
                Token::Number(val) => out.push(Expr::Num(*val)),
                Token::Ident(name) => out.push(Expr::Label(name.clone())),
                _ => return Err("expected number or label".into()),
            }
        }
        if out.is_empty() {
            return Err("directive requires at least one value".into());
        }
        Ok(out)
    }

    fn parse_number(text: &str) -> Result<u32, String> {
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16).map_err(|_| format!("invalid hex literal '{text}'"))
        } else {
            text.parse::<u32>().map_err(|_| format!("invalid number '{text}'"))
        }
    }

    fn unescape(ch: char) -> Result<char, String> {
        Ok(match ch {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            other => return Err(format!("unsupported escape \\{other}")),
        })
    }

    fn strip_comments(line: &str) -> Result<String, String> {
        let mut out = String::new();
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for ch in line.chars() {
            if let Some(q) = quote {
                out.push(ch);
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
                continue;
            }
            if ch == '"' || ch == '\'' {
                quote = Some(ch);
            }
            if ch == ';' || ch == '#' {
                break;
            }
            out.push(ch);
        }

        if quote.is_some() {
            return Err("unterminated literal".into());
        }

        Ok(out)
    }

    fn tokenize(line: &str) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        let mut chars = line.chars().peekable();

        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() {
                chars.next();
                continue;
            }

            if ch.is_ascii_alphabetic() || ch == '_' || ch == '.' {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
                continue;
            }

            if ch.is_ascii_digit() || ch == '-' {
                chars.next();
                let negative = ch == '-';
                let mut text = String::new();
                if !negative {
                    text.push(ch);
                }
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_hexdigit() || c == 'x' || c == 'X' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = parse_number(&text)?;
                tokens.push(Token::Number(if negative { value.wrapping_neg() } else { value }));
                continue;
            }

            if ch == '\'' {
                chars.next();
                let c = match chars.next() {
                    Some('\\') => unescape(chars.next().ok_or("unterminated char literal")?)?,
                    Some(c) => c,
                    None => return Err("unterminated char literal".into()),
                };
                if chars.next() != Some('\'') || !c.is_ascii() {
                    return Err("bad char literal".into());
                }
                tokens.push(Token::Number(c as u32));
                continue;
            }

            if ch == '"' {
                chars.next();
                let mut buf = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = chars.next().ok_or("unterminated string escape")?;
                            buf.push(unescape(escaped)?);
                        }
                        Some(c) => buf.push(c),
                        None => return Err("unterminated string literal".into()),
                    }
                }
                tokens.push(Token::Str(buf));
                continue;
            }

            let sym = match ch {
                ':' => ":",
                ',' => ",",
                '[' => "[",
                ']' => "]",
                _ => return Err(format!("unexpected character '{ch}'")),
            };
            chars.next();
            tokens.push(Token::Sym(sym));
        }

        Ok(tokens)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn comments_respect_literals() {
            assert_eq!(strip_comments("mov eax, ';' ; note").unwrap(), "mov eax, ';' ");
            assert_eq!(strip_comments(".ascii \"a#b\" # c").unwrap(), ".ascii \"a#b\" ");
        }

        #[test]
        fn tokenizes_memory_operands() {
            let tokens = tokenize("movb [ebx], -1").unwrap();
            assert_eq!(
                tokens,
                vec![
                    Token::Ident("movb".into()),
                    Token::Sym("["),
                    Token::Ident("ebx".into()),
                    Token::Sym("]"),
                    Token::Sym(","),
                    Token::Number(0xffff_ffff),
                ]
            );
        }
    }
}
