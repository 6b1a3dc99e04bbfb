use async_trait::async_trait;

use wisp_core::tools::{Tool, ToolError};

/// Evaluates arithmetic expressions: `+ - * /`, unary minus, parentheses.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluates an arithmetic expression (+, -, *, / and parentheses)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expr": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. \"2+2\""
                }
            },
            "required": ["expr"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let expr = args
            .get("expr")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'expr'".into()))?;

        let value = eval(expr).map_err(ToolError::ExecutionFailed)?;

        // Integral results serialize as integers so "2+2" reads back as 4,
        // not 4.0.
        if value.fract() == 0.0 && value.abs() < 9e15 {
            Ok(serde_json::json!(value as i64))
        } else {
            Ok(serde_json::json!(value))
        }
    }
}

/// Recursive-descent evaluation over the expression grammar:
/// expr := term (('+' | '-') term)* ; term := factor (('*' | '/') factor)* ;
/// factor := '-' factor | '(' expr ')' | number
fn eval(input: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(format!(
            "unexpected character '{}' at position {}",
            parser.chars[parser.pos], parser.pos
        ));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        loop {
            if self.eat('*') {
                value *= self.factor()?;
            } else if self.eat('/') {
                let divisor = self.factor()?;
                if divisor == 0.0 {
                    return Err("division by zero".into());
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn factor(&mut self) -> Result<f64, String> {
        self.skip_ws();
        if self.eat('-') {
            return Ok(-self.factor()?);
        }
        if self.eat('(') {
            let value = self.expr()?;
            if !self.eat(')') {
                return Err("missing closing parenthesis".into());
            }
            return Ok(value);
        }
        self.number()
    }

    fn number(&mut self) -> Result<f64, String> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(match self.peek() {
                Some(c) => format!("expected a number, found '{c}'"),
                None => "unexpected end of expression".into(),
            });
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>().map_err(|_| format!("invalid number '{text}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_two_and_two() {
        let result = CalculatorTool
            .execute(serde_json::json!({"expr": "2+2"}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(4));
    }

    #[tokio::test]
    async fn missing_expr_is_invalid_arguments() {
        let err = CalculatorTool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn division_by_zero_fails() {
        let err = CalculatorTool
            .execute(serde_json::json!({"expr": "1/0"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(eval("2+3*4").unwrap(), 14.0);
        assert_eq!(eval("(2+3)*4").unwrap(), 20.0);
        assert_eq!(eval("10/4").unwrap(), 2.5);
        assert_eq!(eval("-(3+1)*2").unwrap(), -8.0);
        assert_eq!(eval(" 1 +  2 ").unwrap(), 3.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(eval("2+").is_err());
        assert!(eval("(1").is_err());
        assert!(eval("1 2").is_err());
        assert!(eval("two plus two").is_err());
        assert!(eval("1.2.3").is_err());
    }

    #[tokio::test]
    async fn fractional_results_stay_fractional() {
        let result = CalculatorTool
            .execute(serde_json::json!({"expr": "7/2"}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(3.5));
    }
}
